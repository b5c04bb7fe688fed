mod effects;
mod keyboard;
mod voice;

pub use effects::{Effects, EffectsConfig, Light, Particle};
pub use keyboard::{KeyState, Keyboard, KeyboardConfig, KeyboardLayout};
pub use voice::{VoiceChannel, VoiceStats};

/// Nominal frame the animation rates are tuned against (60 fps).
pub const FRAME_MS: f64 = 1000.0 / 60.0;

/// Fraction of the remaining distance a single-pole smoother covers in
/// `dt_ms`, given the fraction `rate` it covers per nominal frame.
pub(crate) fn smoothing(rate: f32, dt_ms: f64) -> f32 {
    if !dt_ms.is_finite() || dt_ms <= 0.0 {
        return 0.0;
    }
    let rate = rate.clamp(0.0, 1.0);
    let frames = (dt_ms / FRAME_MS) as f32;
    (1.0 - (1.0 - rate).powf(frames)).clamp(0.0, 1.0)
}
