use crate::audio::{VoiceBackend, VoiceHandle};
use crate::timing::{NoteId, Timeline, Transitions};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceStats {
    pub attacks: u64,
    pub releases: u64,
    /// Transitions that contradicted the bindings (double start, orphan end)
    pub defects: u64,
    pub backend_failures: u64,
}

/// Turns started/ended transitions into attack/release calls and remembers
/// which voice holds which note.
pub struct VoiceChannel<B: VoiceBackend> {
    backend: B,
    bindings: HashMap<NoteId, VoiceHandle>,
    stats: VoiceStats,
}

impl<B: VoiceBackend> VoiceChannel<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            bindings: HashMap::new(),
            stats: VoiceStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stats(&self) -> VoiceStats {
        self.stats
    }

    pub fn is_bound(&self, id: NoteId) -> bool {
        self.bindings.contains_key(&id)
    }

    pub fn bound_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn apply(&mut self, transitions: &Transitions, timeline: &Timeline) {
        // releases first so a pitch re-struck on this tick is not cut by its predecessor
        for &id in &transitions.ended {
            self.end(id);
        }
        for &id in &transitions.started {
            match timeline.get(id) {
                Some(note) => self.start(id, note.pitch, note.velocity),
                None => {
                    self.stats.defects += 1;
                    tracing::error!(id, "started note is not in the timeline");
                }
            }
        }
    }

    fn start(&mut self, id: NoteId, pitch: u8, velocity: f32) {
        if self.bindings.contains_key(&id) {
            self.stats.defects += 1;
            tracing::error!(id, pitch, "note started while already holding a voice, skipping attack");
            return;
        }
        match self.backend.attack(pitch, velocity) {
            Ok(voice) => {
                self.stats.attacks += 1;
                self.bindings.insert(id, voice);
            }
            Err(e) => {
                self.stats.backend_failures += 1;
                tracing::warn!(id, pitch, "attack dropped: {}", e);
            }
        }
    }

    fn end(&mut self, id: NoteId) {
        let Some(voice) = self.bindings.remove(&id) else {
            // expected after a failed attack, a defect otherwise
            tracing::warn!(id, "note ended without a bound voice");
            return;
        };
        self.stats.releases += 1;
        if let Err(e) = self.backend.release(voice) {
            self.stats.backend_failures += 1;
            tracing::warn!(id, ?voice, "release failed: {}", e);
        }
    }

    /// Releases every held voice and forgets all bindings.
    pub fn release_all(&mut self) {
        if self.bindings.is_empty() {
            return;
        }
        tracing::debug!(count = self.bindings.len(), "releasing all voices");
        let mut bindings: Vec<_> = self.bindings.drain().collect();
        bindings.sort_unstable();
        for (id, voice) in bindings {
            self.stats.releases += 1;
            if let Err(e) = self.backend.release(voice) {
                self.stats.backend_failures += 1;
                tracing::warn!(id, ?voice, "release failed: {}", e);
            }
        }
    }
}
