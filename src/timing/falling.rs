use super::{NoteId, Timeline};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallConfig {
    /// How far ahead of the play line notes become visible
    pub lookahead_ms: f64,
    pub fade_in_ms: f64,
    pub fade_out_ms: f64,
    pub active_scale: f32,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 1500.0,
            fade_in_ms: 1000.0,
            fade_out_ms: 500.0,
            active_scale: 1.15,
        }
    }
}

const BASE_OPACITY: f32 = 0.95;

/// Per-note render parameters for the falling-note geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct FallingNote {
    pub id: NoteId,
    pub pitch: u8,
    pub velocity: f32,
    /// Milliseconds until the note reaches the play line (negative once it has)
    pub until_start_ms: f64,
    /// Length of the note body in milliseconds
    pub duration_ms: f64,
    /// 0.0 at the far edge of the lookahead window, 1.0 at the play line
    pub progress: f32,
    pub opacity: f32,
    pub scale: f32,
    pub active: bool,
}

pub fn falling_notes(time_ms: f64, timeline: &Timeline, config: &FallConfig) -> Vec<FallingNote> {
    if !time_ms.is_finite() {
        return Vec::new();
    }
    let lookahead = config.lookahead_ms.max(1.0);

    timeline
        .overlapping(time_ms - config.fade_out_ms, time_ms + lookahead)
        .map(|note| {
            let until_start_ms = note.start_ms - time_ms;
            let since_end_ms = time_ms - note.end_ms();
            let active = note.contains(time_ms);

            let opacity = if since_end_ms >= 0.0 {
                let fade = if config.fade_out_ms > 0.0 {
                    (since_end_ms / config.fade_out_ms).min(1.0)
                } else {
                    1.0
                };
                BASE_OPACITY * (1.0 - fade as f32)
            } else if until_start_ms > 0.0 {
                let fade = if config.fade_in_ms > 0.0 {
                    (1.0 - until_start_ms / config.fade_in_ms).max(0.0)
                } else {
                    1.0
                };
                BASE_OPACITY * fade as f32
            } else {
                BASE_OPACITY
            };

            FallingNote {
                id: note.id,
                pitch: note.pitch,
                velocity: note.velocity,
                until_start_ms,
                duration_ms: note.duration_ms,
                progress: (1.0 - until_start_ms / lookahead).min(1.0) as f32,
                opacity,
                scale: if active { config.active_scale } else { 1.0 },
                active,
            }
        })
        .filter(|n| n.opacity > 0.0 || n.active)
        .collect()
}
