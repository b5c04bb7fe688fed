use crate::audio::SynthParams;
use crate::channels::{EffectsConfig, KeyboardConfig};
use crate::timing::FallConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "lumiroll.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendChoice {
    Synth,
    Midi {
        /// Substring of the port name; first port when absent.
        port_hint: Option<String>,
        channel: u8,
    },
}

/// Viewer colours as `0xRRGGBB`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub background: u32,
    pub white_key: u32,
    pub black_key: u32,
    pub active_key: u32,
    pub note: u32,
    pub play_line: u32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: 0x000000,
            white_key: 0xffffff,
            black_key: 0x0a0a0a,
            active_key: 0xff0000,
            note: 0xff3300,
            play_line: 0xff0000,
        }
    }
}

impl Theme {
    fn colors(&self) -> [(&'static str, u32); 6] {
        [
            ("background", self.background),
            ("white_key", self.white_key),
            ("black_key", self.black_key),
            ("active_key", self.active_key),
            ("note", self.note),
            ("play_line", self.play_line),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speed: f64,
    pub polyphony: usize,
    pub backend: BackendChoice,
    /// Reload the score when it changes on disk.
    pub watch: bool,
    pub synth: SynthParams,
    pub keyboard: KeyboardConfig,
    pub effects: EffectsConfig,
    pub fall: FallConfig,
    pub theme: Theme,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speed: 1.0,
            polyphony: 64,
            backend: BackendChoice::Synth,
            watch: true,
            synth: SynthParams::default(),
            keyboard: KeyboardConfig::default(),
            effects: EffectsConfig::default(),
            fall: FallConfig::default(),
            theme: Theme::default(),
        }
    }
}

impl Config {
    /// Reads a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(?path, "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_owned(),
                    source,
                });
            }
        };
        let config = Self::from_ron(&text)?;
        tracing::debug!(?path, "config loaded");
        Ok(config)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Config = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !self.speed.is_finite() || self.speed <= 0.0 {
            return invalid(format!("speed must be positive, got {}", self.speed));
        }
        if self.polyphony == 0 {
            return invalid("polyphony must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.synth.volume) {
            return invalid(format!("synth volume {} is outside 0..=1", self.synth.volume));
        }
        if let BackendChoice::Midi { channel, .. } = self.backend {
            if channel > 15 {
                return invalid(format!("MIDI channel {channel} is outside 0..=15"));
            }
        }

        let kb = &self.keyboard;
        if kb.lowest > kb.highest || kb.highest > 127 {
            return invalid(format!("keyboard range {}..={} is not a MIDI range", kb.lowest, kb.highest));
        }
        for (name, rate) in [
            ("attack_rate", kb.attack_rate),
            ("release_rate", kb.release_rate),
            ("press_rate", kb.press_rate),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return invalid(format!("keyboard {name} {rate} is outside (0, 1]"));
            }
        }

        if let Some((name, color)) = self.theme.colors().into_iter().find(|(_, c)| *c > 0xFF_FFFF) {
            return invalid(format!("theme {name} {color:#x} is not an 0xRRGGBB colour"));
        }

        let fx = &self.effects;
        if !(0.0..=1.0).contains(&fx.emit_chance) {
            return invalid(format!("emit_chance {} is outside 0..=1", fx.emit_chance));
        }
        if fx.burst_min > fx.burst_max {
            return invalid(format!("burst_min {} exceeds burst_max {}", fx.burst_min, fx.burst_max));
        }

        if !(self.fall.lookahead_ms > 0.0) || self.fall.fade_in_ms < 0.0 || self.fall.fade_out_ms < 0.0 {
            return invalid("fall window lengths must be positive".into());
        }
        Ok(())
    }
}
