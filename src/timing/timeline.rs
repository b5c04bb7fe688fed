use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Stable identity of a note within one loaded timeline.
pub type NoteId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub id: NoteId,
    /// MIDI key number
    pub pitch: u8,
    pub start_ms: f64,
    pub duration_ms: f64,
    /// 0.0 -> 1.0
    pub velocity: f32,
    #[serde(default)]
    pub track: usize,
}

impl NoteEvent {
    pub fn end_ms(&self) -> f64 {
        self.start_ms + self.duration_ms
    }

    /// Half-open containment: a note is sounding on `[start, end)`.
    pub fn contains(&self, time_ms: f64) -> bool {
        self.start_ms <= time_ms && time_ms < self.end_ms()
    }
}

/// A note as delivered by an importer, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNote {
    pub pitch: u8,
    pub start_ms: f64,
    pub duration_ms: f64,
    #[serde(default = "default_velocity")]
    pub velocity: f32,
    #[serde(default)]
    pub track: usize,
}

fn default_velocity() -> f32 {
    0.7
}

#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    #[error("duplicate note id {0}")]
    DuplicateId(NoteId),
    #[error("note {id} has invalid start time {start_ms}")]
    InvalidStart { id: NoteId, start_ms: f64 },
    #[error("note {id} has invalid duration {duration_ms}")]
    InvalidDuration { id: NoteId, duration_ms: f64 },
    #[error("note {id} has velocity {velocity} outside 0.0..=1.0")]
    InvalidVelocity { id: NoteId, velocity: f32 },
}

/// Immutable, start-ordered list of note events for one loaded piece.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<NoteEvent>,
    duration_ms: f64,
    max_note_ms: f64,
}

impl Timeline {
    pub fn new(mut events: Vec<NoteEvent>) -> Result<Self, TimelineError> {
        let mut seen = HashSet::with_capacity(events.len());
        for event in &events {
            validate(event)?;
            if !seen.insert(event.id) {
                return Err(TimelineError::DuplicateId(event.id));
            }
        }

        events.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms).then(a.id.cmp(&b.id)));

        let duration_ms = events.iter().map(NoteEvent::end_ms).fold(0.0, f64::max);
        let max_note_ms = events.iter().map(|e| e.duration_ms).fold(0.0, f64::max);

        Ok(Self {
            events,
            duration_ms,
            max_note_ms,
        })
    }

    /// Sorts raw notes by start time and numbers them in that order.
    pub fn from_notes(mut notes: Vec<RawNote>) -> Result<Self, TimelineError> {
        notes.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));
        let events = notes
            .into_iter()
            .enumerate()
            .map(|(i, note)| NoteEvent {
                id: i as NoteId,
                pitch: note.pitch,
                start_ms: note.start_ms,
                duration_ms: note.duration_ms,
                velocity: note.velocity,
                track: note.track,
            })
            .collect();
        Self::new(events)
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// End of the last sounding note.
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn max_note_ms(&self) -> f64 {
        self.max_note_ms
    }

    pub fn get(&self, id: NoteId) -> Option<&NoteEvent> {
        // ids are usually assigned in start order, so try the direct slot first
        match self.events.get(id as usize) {
            Some(event) if event.id == id => Some(event),
            _ => self.events.iter().find(|e| e.id == id),
        }
    }

    /// Events whose start lies in `[from_ms, to_ms]`.
    pub fn starting_between(&self, from_ms: f64, to_ms: f64) -> &[NoteEvent] {
        let lo = self.events.partition_point(|e| e.start_ms < from_ms);
        let hi = self.events.partition_point(|e| e.start_ms <= to_ms);
        if lo >= hi { &[] } else { &self.events[lo..hi] }
    }

    /// Events that may overlap `[from_ms, to_ms]`: anything starting late
    /// enough that the longest note could still reach `from_ms`.
    pub fn overlapping(&self, from_ms: f64, to_ms: f64) -> impl Iterator<Item = &NoteEvent> {
        self.starting_between(from_ms - self.max_note_ms, to_ms)
            .iter()
            .filter(move |e| e.end_ms() > from_ms)
    }
}

fn validate(event: &NoteEvent) -> Result<(), TimelineError> {
    if !event.start_ms.is_finite() || event.start_ms < 0.0 {
        return Err(TimelineError::InvalidStart {
            id: event.id,
            start_ms: event.start_ms,
        });
    }
    if !event.duration_ms.is_finite() || event.duration_ms <= 0.0 {
        return Err(TimelineError::InvalidDuration {
            id: event.id,
            duration_ms: event.duration_ms,
        });
    }
    if !(0.0..=1.0).contains(&event.velocity) {
        return Err(TimelineError::InvalidVelocity {
            id: event.id,
            velocity: event.velocity,
        });
    }
    Ok(())
}

pub fn is_black_key(pitch: u8) -> bool {
    matches!(pitch % 12, 1 | 3 | 6 | 8 | 10)
}

pub fn note_name(pitch: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = (pitch / 12) as i32 - 1;
    format!("{}{}", NAMES[(pitch % 12) as usize], octave)
}
