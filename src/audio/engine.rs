use super::{AudioError, VoiceBackend, VoiceError, VoiceHandle};
use crossbeam::channel::{Receiver, TryRecvError};
use std::collections::HashMap;

pub type BoxedBackend = Box<dyn VoiceBackend + Send>;
pub type BackendResult = Result<BoxedBackend, AudioError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPhase {
    Uninitialized,
    Initializing,
    Ready,
}

struct PendingAttack {
    handle: VoiceHandle,
    pitch: u8,
    velocity: f32,
}

enum State {
    Uninitialized,
    Initializing {
        ready: Receiver<BackendResult>,
        pending: Vec<PendingAttack>,
    },
    Ready {
        backend: BoxedBackend,
        voices: HashMap<VoiceHandle, VoiceHandle>,
    },
}

/// Front door to whichever backend is (or will be) producing sound. Hands out
/// its own handles so attacks issued while the backend is still starting can
/// be queued and replayed in order once it is ready.
pub struct AudioEngine {
    state: State,
    next_handle: u64,
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine {
    pub fn new() -> Self {
        Self {
            state: State::Uninitialized,
            next_handle: 0,
        }
    }

    pub fn with_backend(backend: BoxedBackend) -> Self {
        Self {
            state: State::Ready {
                backend,
                voices: HashMap::new(),
            },
            next_handle: 0,
        }
    }

    pub fn phase(&self) -> AudioPhase {
        match self.state {
            State::Uninitialized => AudioPhase::Uninitialized,
            State::Initializing { .. } => AudioPhase::Initializing,
            State::Ready { .. } => AudioPhase::Ready,
        }
    }

    /// Starts waiting for a backend. Ignored unless uninitialized.
    pub fn begin(&mut self, ready: Receiver<BackendResult>) {
        if !matches!(self.state, State::Uninitialized) {
            tracing::debug!("audio start requested while {:?}, ignoring", self.phase());
            return;
        }
        self.state = State::Initializing {
            ready,
            pending: Vec::new(),
        };
    }

    /// Checks whether the backend has arrived and flushes queued attacks.
    pub fn poll(&mut self) -> AudioPhase {
        let outcome = match &self.state {
            State::Initializing { ready, .. } => match ready.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => return AudioPhase::Initializing,
                Err(TryRecvError::Disconnected) => Err(AudioError::InitAborted),
            },
            _ => return self.phase(),
        };

        let pending = match std::mem::replace(&mut self.state, State::Uninitialized) {
            State::Initializing { pending, .. } => pending,
            _ => Vec::new(),
        };

        match outcome {
            Ok(mut backend) => {
                let mut voices = HashMap::with_capacity(pending.len());
                let queued = pending.len();
                for attack in pending {
                    match backend.attack(attack.pitch, attack.velocity) {
                        Ok(inner) => {
                            voices.insert(attack.handle, inner);
                        }
                        Err(e) => tracing::warn!(pitch = attack.pitch, "queued attack dropped: {}", e),
                    }
                }
                tracing::info!(queued, "audio backend ready");
                self.state = State::Ready { backend, voices };
            }
            Err(e) => {
                tracing::error!(dropped = pending.len(), "audio backend failed to start: {}", e);
            }
        }
        self.phase()
    }

    fn issue_handle(&mut self) -> VoiceHandle {
        self.next_handle += 1;
        VoiceHandle(self.next_handle)
    }
}

impl VoiceBackend for AudioEngine {
    fn attack(&mut self, pitch: u8, velocity: f32) -> Result<VoiceHandle, VoiceError> {
        match &mut self.state {
            State::Uninitialized => Err(VoiceError::NotReady),
            State::Initializing { .. } => {
                let handle = self.issue_handle();
                if let State::Initializing { pending, .. } = &mut self.state {
                    pending.push(PendingAttack {
                        handle,
                        pitch,
                        velocity,
                    });
                }
                Ok(handle)
            }
            State::Ready { backend, .. } => {
                let inner = backend.attack(pitch, velocity)?;
                let handle = self.issue_handle();
                if let State::Ready { voices, .. } = &mut self.state {
                    voices.insert(handle, inner);
                }
                Ok(handle)
            }
        }
    }

    fn release(&mut self, voice: VoiceHandle) -> Result<(), VoiceError> {
        match &mut self.state {
            State::Uninitialized => Err(VoiceError::UnknownVoice(voice)),
            State::Initializing { pending, .. } => {
                // the attack never reached a backend; cancelling it is the release
                let index = pending
                    .iter()
                    .position(|p| p.handle == voice)
                    .ok_or(VoiceError::UnknownVoice(voice))?;
                pending.remove(index);
                Ok(())
            }
            State::Ready { backend, voices } => {
                let inner = voices.remove(&voice).ok_or(VoiceError::UnknownVoice(voice))?;
                backend.release(inner)
            }
        }
    }
}
