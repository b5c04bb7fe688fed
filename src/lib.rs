pub mod audio;
pub mod channels;
pub mod config;
pub mod engine;
pub mod events;
pub mod midi_file;
pub mod pool;
pub mod score;
pub mod timing;
pub mod ui;
pub mod watch;

pub use config::{BackendChoice, Config, ConfigError, Theme};
pub use engine::{Discontinuity, Frame, Visualizer};
pub use events::TransportCommand;
pub use score::{Score, ScoreError, load_timeline};
pub use ui::LumirollApp;
