use lumiroll::audio::list_output_ports;
use lumiroll::config::DEFAULT_CONFIG_PATH;
use lumiroll::{Config, LumirollApp};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> eframe::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumiroll=info")),
        )
        .init();

    let mut score = None;
    for arg in std::env::args_os().skip(1) {
        if arg == "--list-midi-ports" {
            match list_output_ports() {
                Ok(ports) => ports.iter().for_each(|p| println!("{p}")),
                Err(e) => tracing::error!("cannot enumerate MIDI ports: {}", e),
            }
            return Ok(());
        }
        score = Some(PathBuf::from(arg));
    }

    let config_path = std::env::var_os("LUMIROLL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        tracing::error!(path = ?config_path, "ignoring config: {}", e);
        Config::default()
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title("lumiroll")
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "lumiroll",
        options,
        Box::new(|_cc| Ok(Box::new(LumirollApp::new(config, score)))),
    )
}
