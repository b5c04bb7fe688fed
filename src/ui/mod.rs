mod piano_roll;

use crate::audio::{AudioEngine, AudioPhase, MidiOutBackend, SynthParams, spawn_synth};
use crate::channels::KeyboardLayout;
use crate::config::{BackendChoice, Config};
use crate::engine::Visualizer;
use crate::events::TransportCommand;
use crate::score::{MIDI_EXTENSIONS, load_timeline};
use crate::watch::watch_score;
use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use eframe::egui;
use piano_roll::{Palette, PianoRoll, PianoRollState};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Longest step the clock takes in one frame; longer stalls are skipped.
const MAX_FRAME_MS: f64 = 250.0;

pub struct LumirollApp {
    visualizer: Visualizer,
    config: Config,
    layout: KeyboardLayout,
    roll: PianoRollState,
    score_name: Option<String>,
    commands_tx: Sender<TransportCommand>,
    commands_rx: Receiver<TransportCommand>,
    watcher: Option<notify::RecommendedWatcher>,
    synth_params: Option<Arc<ArcSwap<SynthParams>>>,
    audio_phase: AudioPhase,
    error_message: Option<String>,
}

impl LumirollApp {
    pub fn new(config: Config, score: Option<PathBuf>) -> Self {
        let (commands_tx, commands_rx) = crossbeam::channel::unbounded();
        let roll = PianoRollState {
            lookahead_ms: config.fall.lookahead_ms,
            palette: Palette::from(&config.theme),
            ..PianoRollState::default()
        };
        let mut app = Self {
            visualizer: Visualizer::new(&config, AudioEngine::new()),
            layout: KeyboardLayout::new(config.keyboard.lowest, config.keyboard.highest),
            config,
            roll,
            score_name: None,
            commands_tx,
            commands_rx,
            watcher: None,
            synth_params: None,
            audio_phase: AudioPhase::Uninitialized,
            error_message: None,
        };
        if let Some(path) = score {
            app.open_score(&path, false);
        }
        app
    }

    fn open_score(&mut self, path: &Path, autoplay: bool) {
        match load_timeline(path) {
            Ok((name, timeline)) => {
                self.score_name = Some(name);
                self.error_message = None;
                self.visualizer
                    .apply(TransportCommand::LoadTimeline(Arc::new(timeline)));
                self.send(if autoplay {
                    TransportCommand::Restart
                } else {
                    TransportCommand::Seek(0.0)
                });
                self.watch(path);
            }
            Err(e) => {
                tracing::error!(?path, "failed to open score: {}", e);
                self.error_message = Some(format!("Failed to open {}: {}", path.display(), e));
            }
        }
    }

    fn watch(&mut self, path: &Path) {
        self.watcher = None;
        if !self.config.watch {
            return;
        }
        match watch_score(path, self.commands_tx.clone()) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => tracing::warn!(?path, "cannot watch score: {}", e),
        }
    }

    fn clear(&mut self) {
        self.watcher = None;
        self.score_name = None;
        self.send(TransportCommand::Clear);
    }

    /// Routes a transport command, starting audio on the first play.
    fn send(&mut self, command: TransportCommand) {
        let starts_playback = match command {
            TransportCommand::Play | TransportCommand::Restart => true,
            TransportCommand::TogglePlay => !self.visualizer.cursor().is_playing(),
            _ => false,
        };
        if starts_playback && !self.visualizer.timeline().is_empty() {
            self.ensure_audio();
        }
        self.visualizer.apply(command);
    }

    fn ensure_audio(&mut self) {
        if self.visualizer.backend().phase() != AudioPhase::Uninitialized {
            return;
        }
        match &self.config.backend {
            BackendChoice::Synth => {
                let init = spawn_synth(self.config.synth.clone(), self.config.polyphony);
                self.synth_params = Some(init.params);
                self.visualizer.backend_mut().begin(init.ready);
            }
            BackendChoice::Midi { port_hint, channel } => {
                match MidiOutBackend::connect(port_hint.as_deref(), *channel) {
                    Ok(midi) => *self.visualizer.backend_mut() = AudioEngine::with_backend(Box::new(midi)),
                    Err(e) => {
                        tracing::error!("MIDI output unavailable: {}", e);
                        self.error_message = Some(format!("MIDI output unavailable: {}", e));
                    }
                }
            }
        }
    }

    fn poll_audio(&mut self) {
        let phase = self.visualizer.poll_audio();
        if self.audio_phase == AudioPhase::Initializing && phase == AudioPhase::Uninitialized {
            self.error_message = Some("Audio output failed to start, see log for details".into());
        }
        self.audio_phase = phase;
    }

    fn set_volume(&mut self, volume: f32) {
        self.config.synth.volume = volume;
        if let Some(params) = &self.synth_params {
            let mut next = SynthParams::clone(&params.load());
            next.volume = volume;
            params.store(Arc::new(next));
        }
    }

    fn handle_input(&mut self, ctx: &egui::Context) {
        let (toggle, restart, dropped) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Space),
                i.key_pressed(egui::Key::Home),
                i.raw.dropped_files.iter().find_map(|f| f.path.clone()),
            )
        });
        if toggle {
            self.send(TransportCommand::TogglePlay);
        }
        if restart {
            self.send(TransportCommand::Restart);
        }
        if let Some(path) = dropped {
            self.open_score(&path, true);
        }
    }

    fn menu_bar(&mut self, ui: &mut egui::Ui) {
        egui::MenuBar::new().ui(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open Score...").clicked() {
                    if let Some(path) = rfd::FileDialog::new()
                        .set_title("Open Score")
                        .add_filter("MIDI", MIDI_EXTENSIONS)
                        .add_filter("Score", &["ron"])
                        .pick_file()
                    {
                        self.open_score(&path, true);
                    }
                    ui.close();
                }

                if ui.button("Load New").clicked() {
                    self.clear();
                    ui.close();
                }

                ui.separator();

                if ui.button("Quit").clicked() {
                    ui.ctx().send_viewport_cmd(egui::ViewportCommand::Close);
                }
            });
            if let Some(name) = &self.score_name {
                ui.separator();
                ui.label(format!(
                    "{} · {} notes · {}",
                    name,
                    self.visualizer.timeline().len(),
                    format_time(self.visualizer.timeline().duration_ms())
                ));
            }
        });
    }

    fn transport_controls(&mut self, ui: &mut egui::Ui) {
        let playing = self.visualizer.cursor().is_playing();
        let time_ms = self.visualizer.cursor().time_ms();
        let duration_ms = self.visualizer.timeline().duration_ms();

        ui.horizontal(|ui| {
            let label = if playing { "⏸ Pause" } else { "▶ Play" };
            if ui.button(label).clicked() {
                self.send(TransportCommand::TogglePlay);
            }
            if ui.button("⏮ Restart").clicked() {
                self.send(TransportCommand::Restart);
            }

            ui.label(format!("{} / {}", format_time(time_ms), format_time(duration_ms)));

            let mut position = time_ms.min(duration_ms);
            let slider = egui::Slider::new(&mut position, 0.0..=duration_ms.max(1.0)).show_value(false);
            if ui.add_enabled(duration_ms > 0.0, slider).changed() {
                self.send(TransportCommand::Seek(position));
            }

            ui.separator();
            let mut speed = self.visualizer.cursor().speed();
            if ui
                .add(egui::Slider::new(&mut speed, 0.25..=3.0).text("speed").suffix("x"))
                .changed()
            {
                self.send(TransportCommand::SetSpeed(speed));
            }

            let mut volume = self.config.synth.volume;
            if ui
                .add(egui::Slider::new(&mut volume, 0.0..=1.0).text("volume"))
                .changed()
            {
                self.set_volume(volume);
            }

            let effects = self.visualizer.effects_mut();
            let mut particles = effects.particles_enabled();
            if ui.checkbox(&mut particles, "particles").changed() {
                effects.set_particles_enabled(particles);
            }
            let mut glow = effects.glow_intensity();
            if ui.add(egui::Slider::new(&mut glow, 0.0..=2.0).text("glow")).changed() {
                effects.set_glow_intensity(glow);
            }

            if self.audio_phase == AudioPhase::Initializing {
                ui.spinner();
            }
        });
    }
}

fn format_time(ms: f64) -> String {
    let seconds = (ms.max(0.0) / 1000.0) as u64;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

impl eframe::App for LumirollApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(command) = self.commands_rx.try_recv() {
            self.visualizer.apply(command);
        }
        self.poll_audio();
        self.handle_input(ctx);

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            self.menu_bar(ui);
        });

        if let Some(error) = self.error_message.clone() {
            egui::TopBottomPanel::top("error").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.colored_label(egui::Color32::RED, error);
                    if ui.small_button("✕").clicked() {
                        self.error_message = None;
                    }
                });
            });
        }

        egui::TopBottomPanel::bottom("transport").show(ctx, |ui| {
            self.transport_controls(ui);
        });

        let dt_ms = (ctx.input(|i| i.stable_dt) as f64 * 1000.0).min(MAX_FRAME_MS);
        let empty = self.visualizer.timeline().is_empty();
        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                let frame = self.visualizer.tick(dt_ms);
                PianoRoll::new(&frame, &self.layout, &self.roll).show(ui);
                if empty {
                    ui.put(
                        ui.max_rect(),
                        egui::Label::new(
                            egui::RichText::new("File → Open Score, or drop a MIDI file or .ron score here")
                                .heading()
                                .color(egui::Color32::GRAY),
                        ),
                    );
                }
            });

        if !self.visualizer.is_idle() || self.audio_phase == AudioPhase::Initializing {
            ctx.request_repaint();
        }
    }
}
