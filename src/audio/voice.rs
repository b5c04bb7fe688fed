use super::{midi_to_freq, synth::Wave};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ADSRConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

impl Default for ADSRConfig {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.3,
            release: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeState {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    Release { time: f32, from: f32 },
    Done,
}

/// One rendered voice of the built-in synth.
#[derive(Debug, Clone)]
pub struct SynthVoice {
    pub pitch: u8,
    pub velocity: f32,
    pub envelope_state: EnvelopeState,
    pub envelope_level: f32,
    phase: f32,
    freq: f32,
}

impl SynthVoice {
    pub fn new(pitch: u8, velocity: f32) -> Self {
        Self {
            pitch,
            velocity: velocity.clamp(0.0, 1.0),
            envelope_state: EnvelopeState::Attack { time: 0.0 },
            envelope_level: 0.0,
            phase: 0.0,
            freq: midi_to_freq(pitch),
        }
    }

    pub fn release(&mut self) {
        if !matches!(
            self.envelope_state,
            EnvelopeState::Release { .. } | EnvelopeState::Done
        ) {
            self.envelope_state = EnvelopeState::Release {
                time: 0.0,
                from: self.envelope_level,
            };
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.envelope_state, EnvelopeState::Done)
    }

    pub fn next_sample(&mut self, wave: &Wave, adsr: &ADSRConfig, sample_rate: f32) -> f32 {
        let sample = match wave {
            Wave::Sine => (self.phase * std::f32::consts::TAU).sin(),
            Wave::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
            Wave::Square => {
                if self.phase < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            Wave::Saw => self.phase * 2.0 - 1.0,
        };

        self.phase += self.freq / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        advance_envelope(self, adsr, 1.0 / sample_rate);
        sample * self.envelope_level * self.velocity
    }
}

pub fn calculate_envelope(state: &EnvelopeState, adsr: &ADSRConfig) -> f32 {
    match state {
        EnvelopeState::Attack { time } => {
            if adsr.attack == 0.0 {
                1.0
            } else {
                (time / adsr.attack).min(1.0)
            }
        }
        EnvelopeState::Decay { time } => {
            let decay_progress = if adsr.decay == 0.0 {
                1.0
            } else {
                (time / adsr.decay).min(1.0)
            };
            1.0 - (1.0 - adsr.sustain) * decay_progress
        }
        EnvelopeState::Sustain => adsr.sustain,
        EnvelopeState::Release { time, from } => {
            let release_progress = if adsr.release == 0.0 {
                1.0
            } else {
                (time / adsr.release).min(1.0)
            };
            from * (1.0 - release_progress)
        }
        EnvelopeState::Done => 0.0,
    }
}

pub fn advance_envelope(voice: &mut SynthVoice, adsr: &ADSRConfig, dt: f32) {
    match &mut voice.envelope_state {
        EnvelopeState::Attack { time } => {
            *time += dt;
            if *time >= adsr.attack {
                voice.envelope_state = EnvelopeState::Decay { time: 0.0 };
                voice.envelope_level = 1.0;
            } else {
                voice.envelope_level = calculate_envelope(&voice.envelope_state, adsr);
            }
        }
        EnvelopeState::Decay { time } => {
            *time += dt;
            if *time >= adsr.decay {
                voice.envelope_state = EnvelopeState::Sustain;
                voice.envelope_level = adsr.sustain;
            } else {
                voice.envelope_level = calculate_envelope(&voice.envelope_state, adsr);
            }
        }
        EnvelopeState::Sustain => {
            voice.envelope_level = adsr.sustain;
        }
        EnvelopeState::Release { time, .. } => {
            *time += dt;
            if *time >= adsr.release {
                voice.envelope_state = EnvelopeState::Done;
                voice.envelope_level = 0.0;
            } else {
                voice.envelope_level = calculate_envelope(&voice.envelope_state, adsr);
            }
        }
        EnvelopeState::Done => {
            voice.envelope_level = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(voice: &mut SynthVoice, adsr: &ADSRConfig, seconds: f32) {
        let sample_rate = 1000.0;
        for _ in 0..(seconds * sample_rate) as usize {
            voice.next_sample(&Wave::Sine, adsr, sample_rate);
        }
    }

    #[test]
    fn reaches_sustain_then_finishes_after_release() {
        let adsr = ADSRConfig {
            attack: 0.01,
            decay: 0.02,
            sustain: 0.5,
            release: 0.05,
        };
        let mut voice = SynthVoice::new(69, 1.0);

        run(&mut voice, &adsr, 0.1);
        assert_eq!(voice.envelope_state, EnvelopeState::Sustain);
        assert!((voice.envelope_level - 0.5).abs() < 1e-6);

        voice.release();
        run(&mut voice, &adsr, 0.02);
        assert!(voice.envelope_level < 0.5 && voice.envelope_level > 0.0);

        run(&mut voice, &adsr, 0.1);
        assert!(voice.is_done());
    }

    #[test]
    fn release_during_attack_starts_from_current_level() {
        let adsr = ADSRConfig {
            attack: 1.0,
            ..ADSRConfig::default()
        };
        let mut voice = SynthVoice::new(60, 1.0);
        run(&mut voice, &adsr, 0.25);
        let level = voice.envelope_level;

        voice.release();
        match voice.envelope_state {
            EnvelopeState::Release { from, .. } => assert_eq!(from, level),
            ref other => panic!("expected release, got {other:?}"),
        }
    }

    #[test]
    fn zero_release_finishes_immediately() {
        let adsr = ADSRConfig {
            release: 0.0,
            ..ADSRConfig::default()
        };
        let mut voice = SynthVoice::new(60, 1.0);
        run(&mut voice, &adsr, 0.05);
        voice.release();
        run(&mut voice, &adsr, 0.002);
        assert!(voice.is_done());
    }
}
