mod engine;
mod midi_out;
mod synth;
mod voice;

pub use engine::{AudioEngine, AudioPhase, BackendResult, BoxedBackend};
pub use midi_out::{MidiOutBackend, list_output_ports};
pub use synth::{SynthBackend, SynthInit, SynthParams, Wave, spawn_synth};
pub use voice::{ADSRConfig, EnvelopeState, SynthVoice};

use thiserror::Error;

/// Opaque handle for one sounding voice, issued by the backend that
/// performed the attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceHandle(pub u64);

/// Polyphonic voice engine the core drives. Implementations may fail on
/// either call; callers treat failures as transient.
pub trait VoiceBackend {
    fn attack(&mut self, pitch: u8, velocity: f32) -> Result<VoiceHandle, VoiceError>;
    fn release(&mut self, voice: VoiceHandle) -> Result<(), VoiceError>;
}

impl<B: VoiceBackend + ?Sized> VoiceBackend for Box<B> {
    fn attack(&mut self, pitch: u8, velocity: f32) -> Result<VoiceHandle, VoiceError> {
        (**self).attack(pitch, velocity)
    }

    fn release(&mut self, voice: VoiceHandle) -> Result<(), VoiceError> {
        (**self).release(voice)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VoiceError {
    #[error("audio output is not started")]
    NotReady,
    #[error("all voices are in use")]
    PoolExhausted,
    #[error("unknown voice {0:?}")]
    UnknownVoice(VoiceHandle),
    #[error("voice backend rejected the command: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device")]
    NoOutputDevice,
    #[error("failed to query output config: {0}")]
    OutputConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("failed to open MIDI output: {0}")]
    MidiInit(#[from] midir::InitError),
    #[error("no MIDI output port matches {0:?}")]
    NoMidiPort(Option<String>),
    #[error("failed to connect MIDI output: {0}")]
    MidiConnect(String),
    #[error("audio init thread exited before reporting")]
    InitAborted,
}

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        assert!((midi_to_freq(69) - 440.0).abs() < 1e-3);
        assert!((midi_to_freq(60) - 261.63).abs() < 0.01);
    }
}
