use crate::channels::{KeyState, KeyboardLayout};
use crate::config::Theme;
use crate::engine::Frame;
use crate::timing::{FallingNote, note_name};
use eframe::egui::{self, Color32, Pos2, Rect, Stroke};

const BLACK_KEY_WIDTH: f32 = 0.08;
const WHITE_NOTE_WIDTH: f32 = 0.11;
const BLACK_NOTE_WIDTH: f32 = 0.08;
/// Black keys reach this far down the keyboard.
const BLACK_KEY_DEPTH: f32 = 0.62;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub background: Color32,
    pub white_key: Color32,
    pub black_key: Color32,
    pub active_key: Color32,
    pub note: Color32,
    pub play_line: Color32,
}

impl From<&Theme> for Palette {
    fn from(theme: &Theme) -> Self {
        Self {
            background: rgb(theme.background),
            white_key: rgb(theme.white_key),
            black_key: rgb(theme.black_key),
            active_key: rgb(theme.active_key),
            note: rgb(theme.note),
            play_line: rgb(theme.play_line),
        }
    }
}

#[derive(Clone)]
pub struct PianoRollState {
    /// Share of the view height given to the keyboard.
    pub keyboard_fraction: f32,
    pub lookahead_ms: f64,
    pub palette: Palette,
}

impl Default for PianoRollState {
    fn default() -> Self {
        Self {
            keyboard_fraction: 0.18,
            lookahead_ms: 1500.0,
            palette: Palette::from(&Theme::default()),
        }
    }
}

/// Draws one frame: spotlight glow, falling notes, the play line, the
/// keyboard and particles, in that order.
pub struct PianoRoll<'a> {
    frame: &'a Frame<'a>,
    layout: &'a KeyboardLayout,
    state: &'a PianoRollState,
}

/// World (keyboard units, y up from the play line) to screen.
struct View {
    rect: Rect,
    play_y: f32,
    min_x: f32,
    px_per_unit: f32,
    px_per_ms: f32,
}

impl View {
    fn x(&self, world_x: f32) -> f32 {
        self.rect.left() + (world_x - self.min_x) * self.px_per_unit
    }

    fn y(&self, world_y: f32) -> f32 {
        self.play_y - world_y * self.px_per_unit
    }

    fn black_key_bottom(&self) -> f32 {
        self.play_y + (self.rect.bottom() - self.play_y) * BLACK_KEY_DEPTH
    }

    /// Screen position to (world x, fraction of the way down the keyboard).
    fn keyboard_point(&self, pos: Pos2) -> Option<(f32, f32)> {
        let height = self.rect.bottom() - self.play_y;
        if pos.y < self.play_y || height <= 0.0 {
            return None;
        }
        let x = self.min_x + (pos.x - self.rect.left()) / self.px_per_unit;
        Some((x, (pos.y - self.play_y) / height))
    }
}

impl<'a> PianoRoll<'a> {
    pub fn new(frame: &'a Frame<'a>, layout: &'a KeyboardLayout, state: &'a PianoRollState) -> Self {
        Self {
            frame,
            layout,
            state,
        }
    }

    pub fn show(self, ui: &mut egui::Ui) -> egui::Response {
        let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::hover());
        let rect = response.rect;
        let palette = &self.state.palette;
        painter.rect_filled(rect, 0.0, palette.background);

        let (min_x, max_x) = self.layout.extent();
        let play_y = rect.bottom() - rect.height() * self.state.keyboard_fraction;
        let view = View {
            rect,
            play_y,
            min_x,
            px_per_unit: rect.width() / (max_x - min_x).max(f32::EPSILON),
            px_per_ms: ((play_y - rect.top()) as f64 / self.state.lookahead_ms.max(1.0)) as f32,
        };

        let roll = painter.with_clip_rect(Rect::from_min_max(rect.min, Pos2::new(rect.right(), play_y)));
        self.draw_lights(&roll, &view);
        for note in self.frame.falling {
            self.draw_note(&roll, &view, note);
        }

        painter.line_segment(
            [Pos2::new(rect.left(), play_y), Pos2::new(rect.right(), play_y)],
            Stroke::new(2.0, palette.play_line),
        );

        let keys = painter.with_clip_rect(Rect::from_min_max(Pos2::new(rect.left(), play_y), rect.max));
        self.draw_keys(&keys, &view);
        self.draw_particles(&painter, &view);

        let hovered = response
            .hover_pos()
            .and_then(|pos| view.keyboard_point(pos))
            .and_then(|(x, depth)| key_at(self.frame.keys, self.layout.white_key_width(), x, depth));
        match hovered {
            Some(pitch) => response.on_hover_text_at_pointer(note_name(pitch)),
            None => response,
        }
    }

    fn key(&self, pitch: u8) -> Option<&KeyState> {
        let first = self.frame.keys.first()?.pitch;
        self.frame.keys.get(pitch.checked_sub(first)? as usize)
    }

    fn draw_lights(&self, painter: &egui::Painter, view: &View) {
        for (index, light) in self.frame.lights.iter().enumerate() {
            if light.intensity < 0.01 {
                continue;
            }
            let color = hsl(light.hue(index, self.frame.time_ms), 0.9, 0.5);
            let centre = Pos2::new(view.x(light.x), view.play_y);
            let strength = (light.intensity / 3.0).clamp(0.0, 1.0);
            for ring in 1..=4 {
                let radius = view.rect.height() * 0.15 * ring as f32;
                painter.circle_filled(centre, radius, with_alpha(color, strength * 0.12 / ring as f32));
            }
        }
    }

    fn draw_note(&self, painter: &egui::Painter, view: &View, note: &FallingNote) {
        let Some(key) = self.key(note.pitch) else {
            return;
        };
        let width = if key.is_black { BLACK_NOTE_WIDTH } else { WHITE_NOTE_WIDTH };
        let half = width * note.scale * view.px_per_unit / 2.0;
        let bottom = view.play_y - note.until_start_ms as f32 * view.px_per_ms;
        let length = (note.duration_ms as f32 * view.px_per_ms).max(4.0);

        let palette = &self.state.palette;
        let color = if note.active {
            palette.active_key
        } else {
            // quiet notes sit darker
            mix(Color32::BLACK, palette.note, 0.55 + note.velocity * 0.45)
        };
        let x = view.x(key.x);
        painter.rect_filled(
            Rect::from_min_max(Pos2::new(x - half, bottom - length), Pos2::new(x + half, bottom)),
            2.0,
            with_alpha(color, note.opacity),
        );
    }

    fn draw_keys(&self, painter: &egui::Painter, view: &View) {
        let white_half = self.layout.white_key_width() * view.px_per_unit * 0.48;
        let black_half = BLACK_KEY_WIDTH * view.px_per_unit / 2.0;
        let black_bottom = view.black_key_bottom();
        let palette = &self.state.palette;

        // black keys overlap white ones
        for black in [false, true] {
            for key in self.frame.keys.iter().filter(|k| k.is_black == black) {
                let (half, base, bottom) = if black {
                    (black_half, palette.black_key, black_bottom)
                } else {
                    (white_half, palette.white_key, view.rect.bottom())
                };
                let press = -key.offset * view.px_per_unit;
                let x = view.x(key.x);
                let rect = Rect::from_min_max(
                    Pos2::new(x - half, view.play_y + press),
                    Pos2::new(x + half, bottom + press),
                );
                painter.rect_filled(rect, 2.0, key_color(base, palette.active_key, key.intensity));
                if !black {
                    painter.rect_stroke(rect, 2.0, Stroke::new(1.0, Color32::from_gray(60)), egui::StrokeKind::Inside);
                }
            }
        }
    }

    fn draw_particles(&self, painter: &egui::Painter, view: &View) {
        let glow = self.frame.glow_intensity();
        for particle in self.frame.particles() {
            let (h, s, l) = particle.hsl();
            let alpha = particle.opacity(glow).clamp(0.0, 1.0);
            let radius = (particle.radius() * view.px_per_unit).max(1.0);
            painter.circle_filled(
                Pos2::new(view.x(particle.x), view.y(particle.y)),
                radius,
                with_alpha(hsl(h, s, l), alpha),
            );
        }
    }
}

/// Key under a keyboard point. Black keys sit on top in their upper part.
fn key_at(keys: &[KeyState], white_width: f32, x: f32, depth: f32) -> Option<u8> {
    let under = |black: bool, half: f32| {
        keys.iter()
            .filter(|k| k.is_black == black)
            .find(|k| (k.x - x).abs() <= half)
            .map(|k| k.pitch)
    };
    let black = if depth <= BLACK_KEY_DEPTH {
        under(true, BLACK_KEY_WIDTH / 2.0)
    } else {
        None
    };
    black.or_else(|| under(false, white_width / 2.0))
}

/// Freshly pressed keys flash white and settle into the active colour.
fn key_color(base: Color32, active: Color32, intensity: f32) -> Color32 {
    if intensity <= 0.0 {
        return base;
    }
    let glow = if intensity > 0.7 {
        mix(Color32::WHITE, active, (intensity - 0.7) / 0.3)
    } else {
        active
    };
    mix(base, glow, intensity * 0.9)
}

fn rgb(hex: u32) -> Color32 {
    Color32::from_rgb((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
}

fn mix(a: Color32, b: Color32, t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let lerp = |x: u8, y: u8| (x as f32 + (y as f32 - x as f32) * t).round() as u8;
    Color32::from_rgb(lerp(a.r(), b.r()), lerp(a.g(), b.g()), lerp(a.b(), b.b()))
}

fn with_alpha(color: Color32, alpha: f32) -> Color32 {
    Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), (alpha.clamp(0.0, 1.0) * 255.0) as u8)
}

fn hsl(h: f32, s: f32, l: f32) -> Color32 {
    let h = h.rem_euclid(1.0);
    let s = s.clamp(0.0, 1.0);
    let l = l.clamp(0.0, 1.0);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h * 6.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let channel = |v: f32| ((v + m).clamp(0.0, 1.0) * 255.0).round() as u8;
    Color32::from_rgb(channel(r), channel(g), channel(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Keyboard, KeyboardConfig};

    #[test]
    fn hsl_primaries() {
        assert_eq!(hsl(0.0, 1.0, 0.5), Color32::from_rgb(255, 0, 0));
        assert_eq!(hsl(1.0 / 3.0, 1.0, 0.5), Color32::from_rgb(0, 255, 0));
        assert_eq!(hsl(0.5, 0.0, 1.0), Color32::WHITE);
    }

    #[test]
    fn key_glow_runs_white_to_active() {
        let palette = PianoRollState::default().palette;
        let (white, black, red) = (palette.white_key, palette.black_key, palette.active_key);
        assert_eq!(key_color(black, red, 0.0), black);
        assert_eq!(key_color(white, red, 0.5), mix(white, red, 0.45));
        let peak = key_color(black, red, 1.0);
        assert!(peak.r() > peak.g() && peak.r() > 200);
    }

    #[test]
    fn theme_hex_becomes_palette() {
        let theme = Theme {
            note: 0x12ab34,
            ..Theme::default()
        };
        let palette = Palette::from(&theme);
        assert_eq!(palette.note, Color32::from_rgb(0x12, 0xab, 0x34));
        assert_eq!(palette.white_key, Color32::WHITE);
    }

    #[test]
    fn hover_prefers_black_keys_near_the_top() {
        let keyboard = Keyboard::new(KeyboardConfig::default());
        let keys = keyboard.keys();
        let width = keyboard.layout().white_key_width();
        let c_sharp = keyboard.layout().x(61).unwrap();

        assert_eq!(key_at(keys, width, c_sharp, 0.2), Some(61));
        let below = key_at(keys, width, c_sharp, 0.9).unwrap();
        assert!(below == 60 || below == 62);
        assert_eq!(note_name(key_at(keys, width, keyboard.layout().x(60).unwrap(), 0.9).unwrap()), "C4");
        assert_eq!(key_at(keys, width, 1.0e6, 0.5), None);
    }
}
