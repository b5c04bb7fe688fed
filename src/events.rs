use crate::timing::Timeline;
use std::fmt;
use std::sync::Arc;

/// Messages from the tick loop to the synth's audio callback.
#[derive(Debug, Clone)]
pub enum VoiceCommand {
    Attack {
        slot: usize,
        generation: u32,
        pitch: u8,
        velocity: f32,
    },
    Release { slot: usize },
}

/// Transport requests. Applied between ticks, never during one.
#[derive(Clone)]
pub enum TransportCommand {
    Play,
    Pause,
    TogglePlay,
    Restart,
    Seek(f64),
    SetSpeed(f64),
    LoadTimeline(Arc<Timeline>),
    Clear,
}

impl fmt::Debug for TransportCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play => write!(f, "Play"),
            Self::Pause => write!(f, "Pause"),
            Self::TogglePlay => write!(f, "TogglePlay"),
            Self::Restart => write!(f, "Restart"),
            Self::Seek(ms) => write!(f, "Seek({ms})"),
            Self::SetSpeed(speed) => write!(f, "SetSpeed({speed})"),
            Self::LoadTimeline(timeline) => write!(f, "LoadTimeline({} notes)", timeline.len()),
            Self::Clear => write!(f, "Clear"),
        }
    }
}
