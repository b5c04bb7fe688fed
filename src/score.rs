use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::midi_file;
use crate::timing::{RawNote, Timeline, TimelineError};

/// File extensions read as Standard MIDI Files; everything else is RON.
pub const MIDI_EXTENSIONS: &[&str] = &["mid", "midi"];

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed score: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("malformed MIDI file: {0}")]
    Midi(#[from] midly::Error),
    #[error("failed to serialize score: {0}")]
    Serialize(#[from] ron::Error),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

/// A piece as stored on disk: a flat list of notes in milliseconds. Scores
/// are saved as RON; MIDI files are read into the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    #[serde(default)]
    pub name: String,
    pub notes: Vec<RawNote>,
}

impl Score {
    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let io_error = |source| ScoreError::Io {
            path: path.to_owned(),
            source,
        };
        let score = if is_midi(path) {
            Score::from_midi(&fs::read(path).map_err(io_error)?)?
        } else {
            ron::from_str(&fs::read_to_string(path).map_err(io_error)?)?
        };
        tracing::debug!(?path, notes = score.notes.len(), "score parsed");
        Ok(score)
    }

    pub fn from_midi(bytes: &[u8]) -> Result<Self, ScoreError> {
        let import = midi_file::parse(bytes)?;
        Ok(Score {
            name: import.name.unwrap_or_default(),
            notes: import.notes,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ScoreError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text).map_err(|source| ScoreError::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn to_timeline(&self) -> Result<Timeline, ScoreError> {
        Ok(Timeline::from_notes(self.notes.clone())?)
    }
}

pub fn is_midi(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MIDI_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
}

/// Loads and validates a score in one step.
pub fn load_timeline(path: &Path) -> Result<(String, Timeline), ScoreError> {
    let score = Score::load(path)?;
    let timeline = score.to_timeline()?;
    let name = if score.name.is_empty() {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        score.name
    };
    tracing::info!(%name, notes = timeline.len(), duration_ms = timeline.duration_ms(), "score loaded");
    Ok((name, timeline))
}
