use super::{AudioError, VoiceBackend, VoiceError, VoiceHandle};
use midir::{MidiOutput, MidiOutputConnection};
use std::collections::HashMap;

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

/// Voice bookkeeping for a MIDI port. Overlapping voices on the same pitch
/// share one sounding key; only the last release silences it.
#[derive(Debug, Default)]
struct HeldKeys {
    voices: HashMap<VoiceHandle, u8>,
    counts: HashMap<u8, usize>,
    next_handle: u64,
}

impl HeldKeys {
    fn press(&mut self, pitch: u8) -> VoiceHandle {
        self.next_handle += 1;
        let handle = VoiceHandle(self.next_handle);
        self.voices.insert(handle, pitch);
        *self.counts.entry(pitch).or_default() += 1;
        handle
    }

    /// Returns the pitch to silence when `voice` was its last holder.
    fn lift(&mut self, voice: VoiceHandle) -> Result<Option<u8>, VoiceError> {
        let pitch = self
            .voices
            .remove(&voice)
            .ok_or(VoiceError::UnknownVoice(voice))?;
        match self.counts.get_mut(&pitch) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(None)
            }
            _ => {
                self.counts.remove(&pitch);
                Ok(Some(pitch))
            }
        }
    }

    fn drain(&mut self) -> Vec<u8> {
        self.voices.clear();
        self.counts.drain().map(|(pitch, _)| pitch).collect()
    }
}

/// Sends attacks and releases to an external MIDI device.
pub struct MidiOutBackend {
    conn: MidiOutputConnection,
    channel: u8,
    keys: HeldKeys,
}

pub fn list_output_ports() -> Result<Vec<String>, AudioError> {
    let midi_out = MidiOutput::new("lumiroll")?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_default())
        .collect())
}

impl MidiOutBackend {
    /// Connects to the first port whose name contains `port_hint`, or the
    /// first port when no hint is given.
    pub fn connect(port_hint: Option<&str>, channel: u8) -> Result<Self, AudioError> {
        let midi_out = MidiOutput::new("lumiroll")?;
        let ports = midi_out.ports();
        let port = match port_hint {
            Some(hint) => ports
                .iter()
                .find(|p| midi_out.port_name(p).unwrap_or_default().contains(hint)),
            None => ports.first(),
        }
        .ok_or_else(|| AudioError::NoMidiPort(port_hint.map(str::to_owned)))?
        .clone();

        let name = midi_out.port_name(&port).unwrap_or_default();
        let conn = midi_out
            .connect(&port, "lumiroll-out")
            .map_err(|e| AudioError::MidiConnect(e.to_string()))?;
        tracing::info!(port = %name, channel, "connected MIDI output");

        Ok(Self {
            conn,
            channel: channel & 0x0F,
            keys: HeldKeys::default(),
        })
    }

    fn send(&mut self, message: [u8; 3]) -> Result<(), VoiceError> {
        self.conn
            .send(&message)
            .map_err(|e| VoiceError::Backend(e.to_string()))
    }
}

fn midi_velocity(velocity: f32) -> u8 {
    // velocity 0 would read as note-off
    ((velocity.clamp(0.0, 1.0) * 127.0).round() as u8).max(1)
}

impl VoiceBackend for MidiOutBackend {
    fn attack(&mut self, pitch: u8, velocity: f32) -> Result<VoiceHandle, VoiceError> {
        let pitch = pitch.min(127);
        self.send([NOTE_ON | self.channel, pitch, midi_velocity(velocity)])?;
        Ok(self.keys.press(pitch))
    }

    fn release(&mut self, voice: VoiceHandle) -> Result<(), VoiceError> {
        match self.keys.lift(voice)? {
            Some(pitch) => self.send([NOTE_OFF | self.channel, pitch, 0]),
            None => Ok(()),
        }
    }
}

impl Drop for MidiOutBackend {
    fn drop(&mut self) {
        for pitch in self.keys.drain() {
            let _ = self.send([NOTE_OFF | self.channel, pitch, 0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_maps_to_midi_range() {
        assert_eq!(midi_velocity(1.0), 127);
        assert_eq!(midi_velocity(0.0), 1);
        assert_eq!(midi_velocity(0.5), 64);
        assert_eq!(midi_velocity(7.0), 127);
    }

    #[test]
    fn shared_pitch_is_silenced_by_its_last_voice() {
        let mut keys = HeldKeys::default();
        let first = keys.press(60);
        let second = keys.press(60);
        let other = keys.press(64);

        assert_eq!(keys.lift(first), Ok(None));
        assert_eq!(keys.lift(other), Ok(Some(64)));
        assert_eq!(keys.lift(second), Ok(Some(60)));
        assert!(keys.counts.is_empty());
    }

    #[test]
    fn unknown_or_repeated_release_is_rejected() {
        let mut keys = HeldKeys::default();
        let voice = keys.press(60);
        assert_eq!(keys.lift(voice), Ok(Some(60)));
        assert_eq!(keys.lift(voice), Err(VoiceError::UnknownVoice(voice)));
        assert_eq!(
            keys.lift(VoiceHandle(99)),
            Err(VoiceError::UnknownVoice(VoiceHandle(99)))
        );
    }

    #[test]
    fn drain_lists_each_sounding_pitch_once() {
        let mut keys = HeldKeys::default();
        keys.press(60);
        keys.press(60);
        keys.press(67);
        let mut pitches = keys.drain();
        pitches.sort();
        assert_eq!(pitches, vec![60, 67]);
        assert!(keys.drain().is_empty());
    }
}
