use super::{
    ADSRConfig, AudioError, BackendResult, BoxedBackend, SynthVoice, VoiceBackend, VoiceError,
    VoiceHandle,
};
use crate::events::VoiceCommand;
use crate::pool::Pool;
use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{Receiver, Sender};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Keeps a full chord of voices from clipping.
const HEADROOM: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Triangle,
    Square,
    Saw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthParams {
    /// 0.0 -> 1.0
    pub volume: f32,
    pub wave: Wave,
    pub adsr: ADSRConfig,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            volume: 0.4,
            wave: Wave::Triangle,
            adsr: ADSRConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    generation: u32,
    /// Released by the tick loop; the renderer may still be playing its tail.
    released: bool,
}

/// Renderer report that the voice in `slot` has finished its release tail.
type Finished = (usize, u32);

fn buffer_full() -> VoiceError {
    VoiceError::Backend("synth command buffer is full".into())
}

/// Tick-side half of the built-in synth: hands out voice slots and forwards
/// commands to the audio callback. A slot stays allocated until the renderer
/// reports its voice silent, so a new note never cuts off a release tail
/// unless every slot is busy.
pub struct SynthBackend {
    commands: HeapProd<VoiceCommand>,
    finished: HeapCons<Finished>,
    slots: Pool<Allocation>,
    /// Releases that did not fit in the command buffer, oldest first.
    deferred: VecDeque<usize>,
    generation: u32,
    _shutdown: Option<Sender<()>>,
}

struct Rendered {
    generation: u32,
    voice: SynthVoice,
}

/// Callback-side half of the built-in synth.
pub struct SynthRenderer {
    voices: Vec<Option<Rendered>>,
    commands: HeapCons<VoiceCommand>,
    finished: HeapProd<Finished>,
    params: Arc<ArcSwap<SynthParams>>,
    sample_rate: f32,
    num_channels: usize,
}

impl SynthBackend {
    pub fn new(
        polyphony: usize,
        params: Arc<ArcSwap<SynthParams>>,
        sample_rate: f32,
        num_channels: usize,
    ) -> (SynthBackend, SynthRenderer) {
        let polyphony = polyphony.max(1);
        // every voice can attack and release within one callback period
        let (command_tx, command_rx) = HeapRb::<VoiceCommand>::new(polyphony * 4).split();
        let (finished_tx, finished_rx) = HeapRb::<Finished>::new(polyphony * 2).split();

        let backend = SynthBackend {
            commands: command_tx,
            finished: finished_rx,
            slots: Pool::with_capacity(polyphony),
            deferred: VecDeque::new(),
            generation: 0,
            _shutdown: None,
        };
        let renderer = SynthRenderer {
            voices: (0..polyphony).map(|_| None).collect(),
            commands: command_rx,
            finished: finished_tx,
            params,
            sample_rate,
            num_channels: num_channels.max(1),
        };
        (backend, renderer)
    }

    fn decode(voice: VoiceHandle) -> (usize, u32) {
        ((voice.0 & 0xFFFF_FFFF) as usize, (voice.0 >> 32) as u32)
    }

    /// Frees slots whose voices went silent. Reports for a slot that was
    /// stolen since are stale and ignored.
    fn reclaim(&mut self) {
        while let Some((slot, generation)) = self.finished.try_pop() {
            let current = self
                .slots
                .get(slot)
                .is_some_and(|a| a.released && a.generation == generation);
            if current {
                self.slots.release(slot);
            }
        }
    }

    fn flush_deferred(&mut self) {
        while let Some(&slot) = self.deferred.front() {
            if self.commands.try_push(VoiceCommand::Release { slot }).is_err() {
                break;
            }
            self.deferred.pop_front();
        }
    }

    /// Oldest voice still in its release tail.
    fn steal_candidate(&self) -> Option<usize> {
        self.slots
            .iter()
            .filter(|(_, a)| a.released)
            .min_by_key(|(_, a)| a.generation)
            .map(|(slot, _)| slot)
    }
}

impl VoiceBackend for SynthBackend {
    fn attack(&mut self, pitch: u8, velocity: f32) -> Result<VoiceHandle, VoiceError> {
        self.reclaim();
        self.flush_deferred();

        self.generation = self.generation.wrapping_add(1);
        let allocation = Allocation {
            generation: self.generation,
            released: false,
        };
        let (slot, stolen) = match self.slots.acquire(allocation) {
            Some(slot) => (slot, None),
            None => {
                let slot = self.steal_candidate().ok_or(VoiceError::PoolExhausted)?;
                let previous = self
                    .slots
                    .get_mut(slot)
                    .map(|a| std::mem::replace(a, allocation));
                (slot, previous)
            }
        };

        let command = VoiceCommand::Attack {
            slot,
            generation: allocation.generation,
            pitch,
            velocity,
        };
        if self.commands.try_push(command).is_err() {
            match stolen {
                Some(previous) => {
                    if let Some(a) = self.slots.get_mut(slot) {
                        *a = previous;
                    }
                }
                None => {
                    self.slots.release(slot);
                }
            }
            return Err(buffer_full());
        }
        if stolen.is_some() {
            // the attack replaces the tail, a late release must not cut the new note
            self.deferred.retain(|&s| s != slot);
            tracing::trace!(slot, pitch, "reusing a releasing synth voice");
        }

        Ok(VoiceHandle(((allocation.generation as u64) << 32) | slot as u64))
    }

    fn release(&mut self, voice: VoiceHandle) -> Result<(), VoiceError> {
        let (slot, generation) = Self::decode(voice);
        match self.slots.get_mut(slot) {
            Some(a) if a.generation == generation && !a.released => a.released = true,
            _ => return Err(VoiceError::UnknownVoice(voice)),
        }

        self.flush_deferred();
        if self.deferred.is_empty()
            && self
                .commands
                .try_push(VoiceCommand::Release { slot })
                .is_ok()
        {
            return Ok(());
        }
        tracing::debug!(slot, "synth command buffer full, deferring release");
        self.deferred.push_back(slot);
        Ok(())
    }
}

impl SynthRenderer {
    pub fn active_voices(&self) -> usize {
        self.voices.iter().flatten().count()
    }

    fn apply(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::Attack {
                slot,
                generation,
                pitch,
                velocity,
            } => {
                if let Some(entry) = self.voices.get_mut(slot) {
                    *entry = Some(Rendered {
                        generation,
                        voice: SynthVoice::new(pitch, velocity),
                    });
                }
            }
            VoiceCommand::Release { slot } => {
                if let Some(Some(entry)) = self.voices.get_mut(slot) {
                    entry.voice.release();
                }
            }
        }
    }

    /// Fills an interleaved output buffer.
    pub fn render(&mut self, data: &mut [f32]) {
        while let Some(command) = self.commands.try_pop() {
            self.apply(command);
        }

        let params = self.params.load();
        for frame in data.chunks_mut(self.num_channels) {
            let mut sample = 0.0;
            for entry in self.voices.iter_mut().flatten() {
                sample += entry
                    .voice
                    .next_sample(&params.wave, &params.adsr, self.sample_rate);
            }
            frame.fill(sample * params.volume * HEADROOM);
        }

        for (slot, entry) in self.voices.iter_mut().enumerate() {
            if entry.as_ref().is_some_and(|e| e.voice.is_done()) {
                if let Some(done) = entry.take() {
                    // a dropped report leaves the slot stealable
                    let _ = self.finished.try_push((slot, done.generation));
                }
            }
        }
    }
}

pub struct SynthInit {
    pub ready: Receiver<BackendResult>,
    pub params: Arc<ArcSwap<SynthParams>>,
}

/// Opens the output stream on its own thread. The stream lives on that thread
/// until the backend delivered through `ready` is dropped.
pub fn spawn_synth(params: SynthParams, polyphony: usize) -> SynthInit {
    let (ready_tx, ready_rx) = crossbeam::channel::bounded(1);
    let params = Arc::new(ArcSwap::from_pointee(params));
    let thread_params = params.clone();

    std::thread::spawn(move || {
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(0);
        match open_stream(thread_params, polyphony) {
            Ok((stream, mut backend)) => {
                backend._shutdown = Some(shutdown_tx);
                let backend: BoxedBackend = Box::new(backend);
                if ready_tx.send(Ok(backend)).is_ok() {
                    // returns once the backend (and its sender) is dropped
                    let _ = shutdown_rx.recv();
                }
                drop(stream);
                tracing::debug!("synth output stream closed");
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    SynthInit {
        ready: ready_rx,
        params,
    }
}

fn open_stream(
    params: Arc<ArcSwap<SynthParams>>,
    polyphony: usize,
) -> Result<(cpal::Stream, SynthBackend), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;
    let config = device.default_output_config()?;
    let stream_config: cpal::StreamConfig = config.into();

    let num_channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate as f32;
    tracing::info!(num_channels, sample_rate, polyphony, "audio output opened");

    let (backend, mut renderer) = SynthBackend::new(polyphony, params, sample_rate, num_channels);

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            renderer.render(data);
        },
        |err| tracing::error!("audio stream error: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((stream, backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::EnvelopeState;

    fn synth(polyphony: usize) -> (SynthBackend, SynthRenderer) {
        let params = Arc::new(ArcSwap::from_pointee(SynthParams::default()));
        SynthBackend::new(polyphony, params, 1000.0, 2)
    }

    #[test]
    fn attack_reaches_the_renderer() {
        let (mut backend, mut renderer) = synth(4);
        backend.attack(69, 1.0).unwrap();

        let mut buffer = vec![0.0f32; 64];
        renderer.render(&mut buffer);
        assert_eq!(renderer.active_voices(), 1);
        assert!(buffer.iter().any(|s| *s != 0.0));
        // interleaved channels carry the same sample
        assert_eq!(buffer[10], buffer[11]);
    }

    #[test]
    fn exhausted_pool_is_reported() {
        let (mut backend, _renderer) = synth(2);
        backend.attack(60, 1.0).unwrap();
        backend.attack(61, 1.0).unwrap();
        assert_eq!(backend.attack(62, 1.0), Err(VoiceError::PoolExhausted));
    }

    #[test]
    fn stale_handle_is_rejected_after_slot_reuse() {
        let (mut backend, _renderer) = synth(1);
        let first = backend.attack(60, 1.0).unwrap();
        backend.release(first).unwrap();
        let second = backend.attack(62, 1.0).unwrap();

        assert_ne!(first, second);
        assert_eq!(backend.release(first), Err(VoiceError::UnknownVoice(first)));
        assert_eq!(backend.release(second), Ok(()));
        assert_eq!(backend.release(second), Err(VoiceError::UnknownVoice(second)));
    }

    #[test]
    fn released_voice_is_dropped_after_its_tail() {
        let (mut backend, mut renderer) = synth(2);
        let voice = backend.attack(60, 1.0).unwrap();
        let mut buffer = vec![0.0f32; 200];
        renderer.render(&mut buffer);

        backend.release(voice).unwrap();
        // default release is one second: 1000 frames of 2 channels
        let mut tail = vec![0.0f32; 2 * 1100];
        renderer.render(&mut tail);
        assert_eq!(renderer.active_voices(), 0);
    }

    #[test]
    fn next_note_keeps_the_previous_release_tail() {
        let (mut backend, mut renderer) = synth(2);
        let first = backend.attack(60, 1.0).unwrap();
        renderer.render(&mut vec![0.0f32; 400]);

        backend.release(first).unwrap();
        let second = backend.attack(62, 1.0).unwrap();
        renderer.render(&mut vec![0.0f32; 20]);

        assert_eq!(renderer.active_voices(), 2);
        let (first_slot, _) = SynthBackend::decode(first);
        let (second_slot, _) = SynthBackend::decode(second);
        assert_ne!(first_slot, second_slot);
        let tail = &renderer.voices[first_slot].as_ref().unwrap().voice;
        assert!(matches!(tail.envelope_state, EnvelopeState::Release { .. }));
    }

    #[test]
    fn silent_voice_frees_its_slot() {
        let (mut backend, mut renderer) = synth(1);
        let first = backend.attack(60, 1.0).unwrap();
        renderer.render(&mut vec![0.0f32; 200]);
        backend.release(first).unwrap();
        renderer.render(&mut vec![0.0f32; 2 * 1100]);
        assert_eq!(renderer.active_voices(), 0);

        backend.attack(62, 1.0).unwrap();
        assert_eq!(backend.slots.len(), 1);
        assert!(backend.deferred.is_empty());
        // the finished report was consumed, nothing left to steal
        assert_eq!(backend.attack(64, 1.0), Err(VoiceError::PoolExhausted));
    }

    #[test]
    fn full_pool_steals_the_oldest_tail() {
        let (mut backend, mut renderer) = synth(2);
        let a = backend.attack(60, 1.0).unwrap();
        let b = backend.attack(64, 1.0).unwrap();
        renderer.render(&mut vec![0.0f32; 100]);
        backend.release(b).unwrap();
        backend.release(a).unwrap();

        let c = backend.attack(67, 1.0).unwrap();
        assert_eq!(SynthBackend::decode(c).0, SynthBackend::decode(a).0);
        renderer.render(&mut vec![0.0f32; 20]);
        assert_eq!(renderer.active_voices(), 2);

        // a finished report for the stolen voice arriving late must not free
        // the slot while the new note is still in its own tail
        backend.release(c).unwrap();
        let (slot, stale_generation) = SynthBackend::decode(a);
        renderer.finished.try_push((slot, stale_generation)).unwrap();
        backend.reclaim();
        assert!(backend.slots.get(slot).is_some());
    }

    #[test]
    fn release_waits_for_room_in_a_full_buffer() {
        let (mut backend, mut renderer) = synth(2);
        let held = backend.attack(60, 1.0).unwrap();
        renderer.render(&mut vec![0.0f32; 100]);

        while backend
            .commands
            .try_push(VoiceCommand::Release { slot: usize::MAX })
            .is_ok()
        {}
        assert_eq!(backend.release(held), Ok(()));
        assert_eq!(backend.deferred.len(), 1);

        // the filler drains, the deferred release goes out with the next call
        renderer.render(&mut vec![0.0f32; 2]);
        backend.attack(62, 1.0).unwrap();
        assert!(backend.deferred.is_empty());
        renderer.render(&mut vec![0.0f32; 2]);

        let (slot, _) = SynthBackend::decode(held);
        let voice = &renderer.voices[slot].as_ref().unwrap().voice;
        assert!(matches!(voice.envelope_state, EnvelopeState::Release { .. }));
    }
}
