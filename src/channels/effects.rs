use super::{FRAME_MS, smoothing};
use crate::pool::Pool;
use serde::{Deserialize, Serialize};

const GRAVITY: f32 = 0.0005;
const TURBULENCE: f32 = 0.001;
const LIGHT_RATE: f32 = 0.1;
const LIGHT_REACH: f32 = 2.0;
const LIGHT_CAP: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub max_particles: usize,
    pub particles_enabled: bool,
    /// Chance per frame and per held key of emitting a burst.
    pub emit_chance: f32,
    pub burst_min: usize,
    pub burst_max: usize,
    pub glow_intensity: f32,
    pub light_count: usize,
    pub light_spacing: f32,
    /// Fixed RNG seed, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            max_particles: 1000,
            particles_enabled: true,
            emit_chance: 0.5,
            burst_min: 8,
            burst_max: 15,
            glow_intensity: 1.0,
            light_count: 3,
            light_spacing: 3.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    vx: f32,
    vy: f32,
    pub life_ms: f32,
    pub max_life_ms: f32,
    pub size: f32,
    hue: f32,
}

impl Particle {
    /// 0.0 at birth -> 1.0 at death
    pub fn progress(&self) -> f32 {
        (self.life_ms / self.max_life_ms).clamp(0.0, 1.0)
    }

    pub fn opacity(&self, glow_intensity: f32) -> f32 {
        (1.0 - self.progress()) * glow_intensity * 0.8
    }

    pub fn radius(&self) -> f32 {
        let wobble = (self.life_ms * 0.01).sin() * 0.1;
        self.size * (1.0 - self.progress() * 0.6 + wobble)
    }

    /// Hue, saturation, lightness; darkens towards red as the particle ages.
    pub fn hsl(&self) -> (f32, f32, f32) {
        let p = self.progress();
        (self.hue - p * 0.02, 0.7 + p * 0.2, 0.3 + (1.0 - p) * 0.3)
    }

    fn step(&mut self, dt_ms: f64, rng: &mut fastrand::Rng) -> bool {
        self.life_ms += dt_ms as f32;
        if self.life_ms >= self.max_life_ms {
            return false;
        }
        let frames = (dt_ms / FRAME_MS) as f32;
        self.x += self.vx * frames;
        self.y += self.vy * frames;
        self.vy -= GRAVITY * frames;
        self.vx += (rng.f32() - 0.5) * TURBULENCE * frames;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub x: f32,
    pub intensity: f32,
    target: f32,
}

impl Light {
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Slow drift around orange-red, offset per light.
    pub fn hue(&self, index: usize, time_ms: f64) -> f32 {
        0.05 + ((time_ms * 0.0005) as f32 + index as f32).sin() * 0.02
    }
}

/// Particle bursts over held keys plus a row of spotlights that brighten
/// with nearby notes.
pub struct Effects {
    config: EffectsConfig,
    particles: Pool<Particle>,
    lights: Vec<Light>,
    rng: fastrand::Rng,
}

impl Effects {
    pub fn new(config: EffectsConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        let centre = config.light_count.saturating_sub(1) as f32 / 2.0;
        let lights = (0..config.light_count)
            .map(|i| Light {
                x: (i as f32 - centre) * config.light_spacing,
                intensity: 0.0,
                target: 0.0,
            })
            .collect();
        Self {
            particles: Pool::with_capacity(config.max_particles),
            config,
            lights,
            rng,
        }
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter().map(|(_, p)| p)
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn glow_intensity(&self) -> f32 {
        self.config.glow_intensity
    }

    pub fn set_glow_intensity(&mut self, glow_intensity: f32) {
        self.config.glow_intensity = glow_intensity.max(0.0);
    }

    pub fn particles_enabled(&self) -> bool {
        self.config.particles_enabled
    }

    pub fn set_particles_enabled(&mut self, enabled: bool) {
        self.config.particles_enabled = enabled;
        if !enabled {
            self.particles.clear();
        }
    }

    /// `emitters` are the x positions of held keys, `notes` the x positions
    /// of every active note (one per note, duplicates allowed).
    pub fn update(&mut self, dt_ms: f64, emitters: &[f32], notes: &[f32]) {
        let rng = &mut self.rng;
        self.particles.retain(|p| p.step(dt_ms, rng));

        if self.config.particles_enabled {
            let chance = smoothing(self.config.emit_chance, dt_ms);
            for &x in emitters {
                if self.rng.f32() < chance {
                    let count = self
                        .rng
                        .usize(self.config.burst_min..=self.config.burst_max.max(self.config.burst_min));
                    self.emit(x, count);
                }
            }
        }

        let alpha = smoothing(LIGHT_RATE, dt_ms);
        for light in &mut self.lights {
            let heat: f32 = notes
                .iter()
                .map(|&x| (x - light.x).abs())
                .filter(|&d| d < LIGHT_REACH)
                .map(|d| (1.0 - d / LIGHT_REACH) * 2.0)
                .sum();
            light.target = heat.min(LIGHT_CAP) * self.config.glow_intensity;
            light.intensity += (light.target - light.intensity) * alpha;
        }
    }

    fn emit(&mut self, x: f32, count: usize) {
        for _ in 0..count {
            let rng = &mut self.rng;
            let particle = Particle {
                x: x + (rng.f32() - 0.5) * 0.1,
                y: 0.15 + rng.f32() * 0.1,
                vx: (rng.f32() - 0.5) * 0.03,
                vy: 0.02 + rng.f32() * 0.04,
                life_ms: 0.0,
                max_life_ms: 600.0 + rng.f32() * 400.0,
                size: 0.03 + rng.f32() * 0.02,
                hue: 0.05 + (rng.f32() - 0.5) * 0.05,
            };
            if self.particles.acquire(particle).is_none() {
                // pool exhausted, drop the rest of the burst
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.particles.clear();
        for light in &mut self.lights {
            light.intensity = 0.0;
            light.target = 0.0;
        }
    }
}
