use crate::audio::{AudioEngine, AudioPhase, VoiceBackend};
use crate::channels::{Effects, KeyState, Keyboard, Light, Particle, VoiceChannel, VoiceStats};
use crate::config::Config;
use crate::events::TransportCommand;
use crate::timing::{
    ActiveSet, FallConfig, FallingNote, Jump, PlaybackCursor, Resolver, Timeline, falling_notes,
};
use std::sync::Arc;

/// How much derived state a transport change invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discontinuity {
    /// Same position, playback started or stopped: voices drop, glow tails stay.
    Soft,
    /// Position or timeline changed: every channel starts from scratch.
    Hard,
}

/// Everything a renderer needs for one tick, borrowed from the visualizer.
pub struct Frame<'a> {
    pub time_ms: f64,
    pub duration_ms: f64,
    pub playing: bool,
    pub speed: f64,
    pub active: &'a ActiveSet,
    pub keys: &'a [KeyState],
    pub lights: &'a [Light],
    pub falling: &'a [FallingNote],
    effects: &'a Effects,
}

impl<'a> Frame<'a> {
    pub fn particles(&self) -> impl Iterator<Item = &'a Particle> + 'a {
        self.effects.particles()
    }

    pub fn glow_intensity(&self) -> f32 {
        self.effects.glow_intensity()
    }
}

/// Owns the clock, the resolver and every consumer channel, and runs them
/// in lockstep once per rendered frame.
pub struct Visualizer<B: VoiceBackend = AudioEngine> {
    timeline: Arc<Timeline>,
    cursor: PlaybackCursor,
    resolver: Resolver,
    voice: VoiceChannel<B>,
    keyboard: Keyboard,
    effects: Effects,
    fall: FallConfig,
    active: ActiveSet,
    falling: Vec<FallingNote>,
    note_xs: Vec<f32>,
    key_xs: Vec<f32>,
}

impl<B: VoiceBackend> Visualizer<B> {
    pub fn new(config: &Config, backend: B) -> Self {
        Self {
            timeline: Arc::new(Timeline::default()),
            cursor: PlaybackCursor::new(config.speed),
            resolver: Resolver::new(),
            voice: VoiceChannel::new(backend),
            keyboard: Keyboard::new(config.keyboard.clone()),
            effects: Effects::new(config.effects.clone()),
            fall: config.fall.clone(),
            active: ActiveSet::new(),
            falling: Vec::new(),
            note_xs: Vec::new(),
            key_xs: Vec::new(),
        }
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn effects_mut(&mut self) -> &mut Effects {
        &mut self.effects
    }

    pub fn voice_stats(&self) -> VoiceStats {
        self.voice.stats()
    }

    pub fn backend(&self) -> &B {
        self.voice.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.voice.backend_mut()
    }

    /// True once nothing is left moving on screen while paused.
    pub fn is_idle(&self) -> bool {
        !self.cursor.is_playing() && self.keyboard.is_settled() && self.effects.particle_count() == 0
    }

    pub fn apply(&mut self, command: TransportCommand) {
        tracing::debug!(?command, time_ms = self.cursor.time_ms(), "transport");
        let jump = match command {
            TransportCommand::Play => {
                if self.timeline.is_empty() {
                    tracing::debug!("nothing loaded, ignoring play");
                    Jump::None
                } else {
                    self.cursor.play()
                }
            }
            TransportCommand::Pause => self.cursor.pause(),
            TransportCommand::TogglePlay => {
                if self.timeline.is_empty() && !self.cursor.is_playing() {
                    Jump::None
                } else {
                    self.cursor.toggle()
                }
            }
            TransportCommand::Restart if self.timeline.is_empty() => self.cursor.seek(0.0),
            TransportCommand::Restart => self.cursor.restart(),
            TransportCommand::Seek(time_ms) => self.cursor.seek(time_ms),
            TransportCommand::SetSpeed(speed) => {
                if !self.cursor.set_speed(speed) {
                    tracing::warn!(speed, "ignoring non-positive playback speed");
                }
                Jump::None
            }
            TransportCommand::LoadTimeline(timeline) => {
                tracing::info!(notes = timeline.len(), duration_ms = timeline.duration_ms(), "timeline loaded");
                // keep the position so a reload of the same piece continues in place
                let time_ms = self.cursor.time_ms().min(timeline.duration_ms());
                self.timeline = timeline;
                self.cursor.seek(time_ms)
            }
            TransportCommand::Clear => {
                self.timeline = Arc::new(Timeline::default());
                self.cursor.pause();
                self.cursor.seek(0.0)
            }
        };

        match jump {
            Jump::None => {}
            Jump::Pause => self.discontinuity(Discontinuity::Soft),
            Jump::Seek => self.discontinuity(Discontinuity::Hard),
        }
    }

    /// Invalidates derived state so the next resolve starts from an empty
    /// previous set and every sounding note is re-attacked.
    pub fn discontinuity(&mut self, kind: Discontinuity) {
        tracing::debug!(?kind, "discontinuity");
        self.resolver.reset();
        self.voice.release_all();
        self.active.clear();
        match kind {
            Discontinuity::Soft => self.keyboard.release_all(),
            Discontinuity::Hard => {
                self.keyboard.reset();
                self.effects.reset();
            }
        }
    }

    /// Advances the clock by `wall_dt_ms` and brings every channel to the
    /// new time.
    pub fn tick(&mut self, wall_dt_ms: f64) -> Frame<'_> {
        let time_ms = self.cursor.advance(wall_dt_ms);
        let timeline = &*self.timeline;

        let resolution = self.resolver.resolve(time_ms, timeline);
        if self.cursor.is_playing() {
            self.voice.apply(&resolution.transitions, timeline);
        }

        let layout = self.keyboard.layout();
        self.note_xs.clear();
        let pitches: Vec<u8> = resolution
            .active
            .iter()
            .filter_map(|&id| timeline.get(id))
            .map(|note| note.pitch)
            .collect();
        self.note_xs
            .extend(pitches.iter().filter_map(|&pitch| layout.x(pitch)));

        self.keyboard.update(pitches, wall_dt_ms);
        self.key_xs.clear();
        self.key_xs.extend(self.keyboard.active_key_positions());
        self.effects.update(wall_dt_ms, &self.key_xs, &self.note_xs);

        self.falling = falling_notes(time_ms, timeline, &self.fall);
        self.active = resolution.active;

        Frame {
            time_ms,
            duration_ms: timeline.duration_ms(),
            playing: self.cursor.is_playing(),
            speed: self.cursor.speed(),
            active: &self.active,
            keys: self.keyboard.keys(),
            lights: self.effects.lights(),
            falling: &self.falling,
            effects: &self.effects,
        }
    }
}

impl Visualizer<AudioEngine> {
    /// Lets the audio gate pick up a backend that finished starting.
    pub fn poll_audio(&mut self) -> AudioPhase {
        self.voice.backend_mut().poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{VoiceError, VoiceHandle};
    use crate::timing::RawNote;

    #[derive(Default)]
    struct Counter {
        held: usize,
        attacks: usize,
    }

    impl VoiceBackend for Counter {
        fn attack(&mut self, _pitch: u8, _velocity: f32) -> Result<VoiceHandle, VoiceError> {
            self.held += 1;
            self.attacks += 1;
            Ok(VoiceHandle(self.attacks as u64))
        }

        fn release(&mut self, _voice: VoiceHandle) -> Result<(), VoiceError> {
            self.held -= 1;
            Ok(())
        }
    }

    fn piece() -> Arc<Timeline> {
        let note = |pitch, start_ms, duration_ms| RawNote {
            pitch,
            start_ms,
            duration_ms,
            velocity: 0.8,
            track: 0,
        };
        Arc::new(Timeline::from_notes(vec![note(60, 0.0, 500.0), note(64, 250.0, 500.0)]).unwrap())
    }

    fn visualizer() -> Visualizer<Counter> {
        let mut config = Config::default();
        config.effects.seed = Some(1);
        let mut viz = Visualizer::new(&config, Counter::default());
        viz.apply(TransportCommand::LoadTimeline(piece()));
        viz
    }

    #[test]
    fn play_without_a_timeline_is_ignored() {
        let mut viz = Visualizer::new(&Config::default(), Counter::default());
        viz.apply(TransportCommand::Play);
        assert!(!viz.cursor().is_playing());
        viz.apply(TransportCommand::TogglePlay);
        assert!(!viz.cursor().is_playing());
    }

    #[test]
    fn paused_ticks_resolve_without_sounding() {
        let mut viz = visualizer();
        viz.apply(TransportCommand::Seek(300.0));
        let frame = viz.tick(16.0);
        assert_eq!(frame.time_ms, 300.0);
        assert_eq!(frame.active.len(), 2);
        assert!(!frame.playing);
        assert_eq!(viz.backend().attacks, 0);
    }

    #[test]
    fn voices_follow_the_active_set_while_playing() {
        let mut viz = visualizer();
        viz.apply(TransportCommand::Play);
        viz.tick(0.0);
        assert_eq!(viz.backend().held, 1);
        viz.tick(300.0);
        assert_eq!(viz.backend().held, 2);
        viz.tick(300.0);
        assert_eq!(viz.backend().held, 1);
        viz.tick(300.0);
        assert_eq!(viz.backend().held, 0);
        assert_eq!(viz.voice_stats().defects, 0);
    }

    #[test]
    fn speed_scales_logical_time() {
        let mut viz = visualizer();
        viz.apply(TransportCommand::SetSpeed(2.0));
        viz.apply(TransportCommand::SetSpeed(-1.0));
        viz.apply(TransportCommand::Play);
        assert_eq!(viz.tick(100.0).time_ms, 200.0);
    }

    #[test]
    fn clear_silences_and_empties() {
        let mut viz = visualizer();
        viz.apply(TransportCommand::Play);
        viz.tick(300.0);
        assert_eq!(viz.backend().held, 2);

        viz.apply(TransportCommand::Clear);
        assert_eq!(viz.backend().held, 0);
        let frame = viz.tick(16.0);
        assert!(frame.active.is_empty());
        assert!(frame.falling.is_empty());
        assert_eq!(frame.duration_ms, 0.0);
        assert!(!frame.playing);
    }

    #[test]
    fn reload_keeps_position_and_re_attacks() {
        let mut viz = visualizer();
        viz.apply(TransportCommand::Play);
        viz.tick(300.0);
        viz.apply(TransportCommand::LoadTimeline(piece()));
        assert_eq!(viz.backend().held, 0);

        let frame = viz.tick(0.0);
        assert_eq!(frame.time_ms, 300.0);
        assert_eq!(viz.backend().held, 2);
        assert_eq!(viz.backend().attacks, 4);
    }

    #[test]
    fn idle_only_when_nothing_moves() {
        let mut viz = visualizer();
        viz.apply(TransportCommand::Play);
        viz.tick(100.0);
        viz.apply(TransportCommand::Pause);
        // paused on a held note: the key stays lit and keeps emitting
        for _ in 0..200 {
            viz.tick(16.0);
        }
        assert!(!viz.is_idle());

        viz.apply(TransportCommand::Seek(5000.0));
        viz.tick(16.0);
        assert!(viz.is_idle());
    }
}
