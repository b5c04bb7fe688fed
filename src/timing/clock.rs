/// Logical playback time. Advanced once per render tick; everything else
/// reads the value the tick loop hands out.
#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    time_ms: f64,
    playing: bool,
    speed: f64,
}

/// What a transport operation did to the timeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jump {
    /// Nothing changed; downstream state stays valid.
    None,
    /// Playback stopped or resumed at the same position.
    Pause,
    /// Position moved non-sequentially.
    Seek,
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PlaybackCursor {
    pub fn new(speed: f64) -> Self {
        Self {
            time_ms: 0.0,
            playing: false,
            speed: sanitize_speed(speed),
        }
    }

    pub fn time_ms(&self) -> f64 {
        self.time_ms
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Non-positive or non-finite values are ignored.
    pub fn set_speed(&mut self, speed: f64) -> bool {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
            true
        } else {
            false
        }
    }

    pub fn play(&mut self) -> Jump {
        if self.playing {
            return Jump::None;
        }
        self.playing = true;
        Jump::Pause
    }

    pub fn pause(&mut self) -> Jump {
        if !self.playing {
            return Jump::None;
        }
        self.playing = false;
        Jump::Pause
    }

    pub fn toggle(&mut self) -> Jump {
        if self.playing { self.pause() } else { self.play() }
    }

    pub fn seek(&mut self, time_ms: f64) -> Jump {
        let time_ms = if time_ms.is_finite() { time_ms.max(0.0) } else { 0.0 };
        self.time_ms = time_ms;
        Jump::Seek
    }

    pub fn restart(&mut self) -> Jump {
        self.playing = true;
        self.seek(0.0)
    }

    /// Moves time forward by `wall_dt_ms * speed` while playing.
    pub fn advance(&mut self, wall_dt_ms: f64) -> f64 {
        if self.playing && wall_dt_ms.is_finite() && wall_dt_ms > 0.0 {
            self.time_ms += wall_dt_ms * self.speed;
        }
        self.time_ms
    }
}

fn sanitize_speed(speed: f64) -> f64 {
    if speed.is_finite() && speed > 0.0 { speed } else { 1.0 }
}
