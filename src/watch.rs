use crate::events::TransportCommand;
use crate::score::load_timeline;
use crossbeam::channel::Sender;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Editors often write a file in several steps; events closer than this
/// collapse into one reload.
const DEBOUNCE: Duration = Duration::from_millis(150);

/// Reloads the score whenever it changes on disk and forwards it as a
/// `LoadTimeline` command. Watching stops when the returned watcher is dropped.
pub fn watch_score(
    path: &Path,
    commands: Sender<TransportCommand>,
) -> Result<RecommendedWatcher, notify::Error> {
    let target: PathBuf = path.to_owned();
    let file_name = target.file_name().map(OsString::from);
    // watch the directory so atomic-rename saves are still seen
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
        _ => PathBuf::from("."),
    };

    let mut filter = ReloadFilter::new(file_name);
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("score watcher error: {}", e);
                return;
            }
        };
        if !filter.accept(&event, Instant::now()) {
            return;
        }

        match load_timeline(&target) {
            Ok((name, timeline)) => {
                tracing::info!(%name, "score changed on disk, reloading");
                if commands
                    .send(TransportCommand::LoadTimeline(Arc::new(timeline)))
                    .is_err()
                {
                    tracing::debug!("tick loop gone, dropping reload");
                }
            }
            // keep playing the last good version
            Err(e) => tracing::warn!(path = ?target, "reload failed: {}", e),
        }
    })?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = ?path, "watching score for changes");
    Ok(watcher)
}

/// Decides which directory events are a change to the watched file.
struct ReloadFilter {
    file_name: Option<OsString>,
    last_reload: Option<Instant>,
}

impl ReloadFilter {
    fn new(file_name: Option<OsString>) -> Self {
        Self {
            file_name,
            last_reload: None,
        }
    }

    fn accept(&mut self, event: &notify::Event, now: Instant) -> bool {
        if !(event.kind.is_modify() || event.kind.is_create()) {
            return false;
        }
        if !event
            .paths
            .iter()
            .any(|p| p.file_name() == self.file_name.as_deref())
        {
            return false;
        }
        if self
            .last_reload
            .is_some_and(|t| now.saturating_duration_since(t) < DEBOUNCE)
        {
            return false;
        }
        self.last_reload = Some(now);
        true
    }
}
