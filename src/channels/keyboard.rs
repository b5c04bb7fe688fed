use super::smoothing;
use crate::timing::is_black_key;
use serde::{Deserialize, Serialize};

const WHITE_KEY_WIDTH: f32 = 0.12;
const BLACK_KEY_SHIFT: f32 = 0.6;
const SNAP: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    pub lowest: u8,
    pub highest: u8,
    /// Fraction of the distance to full glow covered per frame.
    pub attack_rate: f32,
    pub release_rate: f32,
    pub press_rate: f32,
    pub press_depth: f32,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            lowest: 21,
            highest: 108,
            attack_rate: 0.25,
            release_rate: 0.06,
            press_rate: 0.5,
            press_depth: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct KeyGeometry {
    pitch: u8,
    x: f32,
    is_black: bool,
}

/// Horizontal placement of every key, centred roughly on zero. White keys
/// sit one width apart; a black key sits just right of the white key below it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyboardLayout {
    keys: Vec<KeyGeometry>,
}

impl Default for KeyboardLayout {
    fn default() -> Self {
        Self::new(21, 108)
    }
}

impl KeyboardLayout {
    pub fn new(lowest: u8, highest: u8) -> Self {
        let (lowest, highest) = (lowest.min(127), highest.min(127));
        let (lowest, highest) = (lowest.min(highest), highest.max(lowest));
        let num_keys = (highest - lowest) as f32 + 1.0;
        let centre = num_keys * WHITE_KEY_WIDTH * 0.3;

        let mut white_index = 0usize;
        let keys = (lowest..=highest)
            .map(|pitch| {
                let is_black = is_black_key(pitch);
                let x = if is_black {
                    (white_index as f32 - 1.0) * WHITE_KEY_WIDTH + WHITE_KEY_WIDTH * BLACK_KEY_SHIFT
                } else {
                    white_index += 1;
                    (white_index - 1) as f32 * WHITE_KEY_WIDTH
                };
                KeyGeometry {
                    pitch,
                    x: x - centre,
                    is_black,
                }
            })
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn lowest(&self) -> Option<u8> {
        self.keys.first().map(|k| k.pitch)
    }

    pub fn white_key_width(&self) -> f32 {
        WHITE_KEY_WIDTH
    }

    fn index(&self, pitch: u8) -> Option<usize> {
        let lowest = self.lowest()?;
        let index = pitch.checked_sub(lowest)? as usize;
        (index < self.keys.len()).then_some(index)
    }

    pub fn x(&self, pitch: u8) -> Option<f32> {
        self.index(pitch).map(|i| self.keys[i].x)
    }

    /// Left edge of the lowest white key and right edge of the highest one.
    pub fn extent(&self) -> (f32, f32) {
        let half = WHITE_KEY_WIDTH / 2.0;
        let xs = self.keys.iter().map(|k| k.x);
        let min = xs.clone().fold(f32::INFINITY, f32::min);
        let max = xs.fold(f32::NEG_INFINITY, f32::max);
        if min > max { (0.0, 0.0) } else { (min - half, max + half) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyState {
    pub pitch: u8,
    /// 0.0 (dark) -> 1.0 (full glow)
    pub intensity: f32,
    /// Vertical press displacement, 0.0 at rest and negative when held.
    pub offset: f32,
    pub active: bool,
    pub x: f32,
    pub is_black: bool,
}

impl KeyState {
    fn settled(&self, press_depth: f32) -> bool {
        let (glow, depth) = if self.active { (1.0, -press_depth) } else { (0.0, 0.0) };
        self.intensity == glow && self.offset == depth
    }
}

/// Glow and press animation per key. Membership comes from the active set
/// each tick; everything else is animation state.
pub struct Keyboard {
    layout: KeyboardLayout,
    config: KeyboardConfig,
    keys: Vec<KeyState>,
}

impl Keyboard {
    pub fn new(config: KeyboardConfig) -> Self {
        let layout = KeyboardLayout::new(config.lowest, config.highest);
        let keys = layout
            .keys
            .iter()
            .map(|k| KeyState {
                pitch: k.pitch,
                intensity: 0.0,
                offset: 0.0,
                active: false,
                x: k.x,
                is_black: k.is_black,
            })
            .collect();
        Self {
            layout,
            config,
            keys,
        }
    }

    pub fn layout(&self) -> &KeyboardLayout {
        &self.layout
    }

    pub fn keys(&self) -> &[KeyState] {
        &self.keys
    }

    pub fn key(&self, pitch: u8) -> Option<&KeyState> {
        self.layout.index(pitch).map(|i| &self.keys[i])
    }

    pub fn update(&mut self, active_pitches: impl IntoIterator<Item = u8>, dt_ms: f64) {
        let mut held = [false; 128];
        for pitch in active_pitches {
            if let Some(slot) = held.get_mut(pitch as usize) {
                *slot = true;
            }
        }

        let attack = smoothing(self.config.attack_rate, dt_ms);
        let release = smoothing(self.config.release_rate, dt_ms);
        let press = smoothing(self.config.press_rate, dt_ms);
        let depth = self.config.press_depth;

        for key in &mut self.keys {
            key.active = held[key.pitch as usize];
            let (glow, offset) = if key.active { (1.0, -depth) } else { (0.0, 0.0) };

            let alpha = if glow > key.intensity { attack } else { release };
            key.intensity = approach(key.intensity, glow, alpha, SNAP);
            key.offset = approach(key.offset, offset, press, depth * SNAP);
        }
    }

    /// Drops membership only; glow keeps decaying on later updates.
    pub fn release_all(&mut self) {
        for key in &mut self.keys {
            key.active = false;
        }
    }

    pub fn reset(&mut self) {
        for key in &mut self.keys {
            key.active = false;
            key.intensity = 0.0;
            key.offset = 0.0;
        }
    }

    pub fn active_key_positions(&self) -> impl Iterator<Item = f32> + '_ {
        self.keys.iter().filter(|k| k.active).map(|k| k.x)
    }

    pub fn is_settled(&self) -> bool {
        self.keys.iter().all(|k| k.settled(self.config.press_depth))
    }
}

fn approach(value: f32, target: f32, alpha: f32, snap: f32) -> f32 {
    let next = value + (target - value) * alpha;
    if (target - next).abs() < snap { target } else { next }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::FRAME_MS;

    #[test]
    fn default_layout_is_a_full_piano() {
        let layout = KeyboardLayout::default();
        assert_eq!(layout.len(), 88);
        assert_eq!(layout.lowest(), Some(21));
        assert_eq!(layout.x(20), None);
        assert_eq!(layout.x(109), None);

        // A0 white, A#0 black to its right, B0 one white width on
        let a0 = layout.x(21).unwrap();
        let a_sharp = layout.x(22).unwrap();
        let b0 = layout.x(23).unwrap();
        assert!((b0 - a0 - WHITE_KEY_WIDTH).abs() < 1e-6);
        assert!(a_sharp > a0 && a_sharp < b0);
    }

    #[test]
    fn glow_rises_monotonically_and_settles() {
        let mut keyboard = Keyboard::new(KeyboardConfig::default());
        let mut last = 0.0;
        let mut ticks = 0;
        while keyboard.key(60).unwrap().intensity < 1.0 {
            keyboard.update([60], FRAME_MS);
            let now = keyboard.key(60).unwrap().intensity;
            assert!(now >= last && now <= 1.0);
            last = now;
            ticks += 1;
            assert!(ticks < 100, "glow never reached full intensity");
        }
        assert!(keyboard.key(60).unwrap().active);
        assert!(keyboard.is_settled());
    }

    #[test]
    fn release_decays_slower_than_attack() {
        let mut keyboard = Keyboard::new(KeyboardConfig::default());
        keyboard.update([64], FRAME_MS);
        let rise = keyboard.key(64).unwrap().intensity;

        for _ in 0..200 {
            keyboard.update([64], FRAME_MS);
        }
        keyboard.update([], FRAME_MS);
        let fall = 1.0 - keyboard.key(64).unwrap().intensity;
        assert!(rise > fall);

        let mut last = keyboard.key(64).unwrap().intensity;
        for _ in 0..300 {
            keyboard.update([], FRAME_MS);
            let now = keyboard.key(64).unwrap().intensity;
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, 0.0);
    }

    #[test]
    fn convergence_is_frame_rate_independent() {
        let mut fast = Keyboard::new(KeyboardConfig::default());
        let mut slow = Keyboard::new(KeyboardConfig::default());
        for _ in 0..4 {
            fast.update([60], FRAME_MS / 2.0);
        }
        for _ in 0..2 {
            slow.update([60], FRAME_MS);
        }
        let a = fast.key(60).unwrap().intensity;
        let b = slow.key(60).unwrap().intensity;
        assert!((a - b).abs() < 1e-4);
    }

    #[test]
    fn release_all_keeps_the_tail_and_reset_clears_it() {
        let mut keyboard = Keyboard::new(KeyboardConfig::default());
        for _ in 0..10 {
            keyboard.update([60, 67], FRAME_MS);
        }
        keyboard.release_all();
        assert_eq!(keyboard.active_key_positions().count(), 0);
        assert!(keyboard.key(60).unwrap().intensity > 0.5);

        keyboard.reset();
        assert!(keyboard.keys().iter().all(|k| k.intensity == 0.0 && k.offset == 0.0));
        assert!(keyboard.is_settled());
    }

    #[test]
    fn press_offset_follows_membership() {
        let config = KeyboardConfig::default();
        let mut keyboard = Keyboard::new(config.clone());
        for _ in 0..30 {
            keyboard.update([48], FRAME_MS);
        }
        assert_eq!(keyboard.key(48).unwrap().offset, -config.press_depth);
        for _ in 0..30 {
            keyboard.update([], FRAME_MS);
        }
        assert_eq!(keyboard.key(48).unwrap().offset, 0.0);
    }

    #[test]
    fn out_of_range_pitches_are_ignored() {
        let mut keyboard = Keyboard::new(KeyboardConfig {
            lowest: 48,
            highest: 72,
            ..KeyboardConfig::default()
        });
        keyboard.update([20, 60, 127], FRAME_MS);
        let positions: Vec<f32> = keyboard.active_key_positions().collect();
        assert_eq!(positions, vec![keyboard.layout().x(60).unwrap()]);
    }
}
