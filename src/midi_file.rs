//! Standard MIDI File import.
//!
//! Notes from every track are merged, keeping the track index. Tick times go
//! through the tempo map into milliseconds and velocities are scaled to 0..=1.
//! A note-on with velocity 0 closes the note like a note-off.

use crate::timing::RawNote;
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{HashMap, VecDeque};

/// Microseconds per quarter note until the first tempo event (120 bpm).
const DEFAULT_TEMPO_US: u32 = 500_000;

#[derive(Debug, Clone, PartialEq)]
pub struct MidiImport {
    /// Name of the first track, if the file sets one.
    pub name: Option<String>,
    pub notes: Vec<RawNote>,
}

pub fn parse(bytes: &[u8]) -> Result<MidiImport, midly::Error> {
    let smf = Smf::parse(bytes)?;
    let clock = TickClock::new(&smf);

    let mut notes = Vec::new();
    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut open: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();
        let mut tick = 0u64;

        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    open.entry((channel, key.as_int()))
                        .or_default()
                        .push_back((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let started = open
                        .get_mut(&(channel, key.as_int()))
                        .and_then(VecDeque::pop_front);
                    match started {
                        Some((start, vel)) => {
                            push_note(&mut notes, &clock, key.as_int(), start, tick, vel, track_index)
                        }
                        None => tracing::trace!(track_index, key = key.as_int(), tick, "note-off without note-on"),
                    }
                }
                _ => {}
            }
        }

        // notes still held at the end of the track stop there
        for ((_, key), pending) in open {
            for (start, vel) in pending {
                push_note(&mut notes, &clock, key, start, tick, vel, track_index);
            }
        }
    }

    notes.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms).then(a.pitch.cmp(&b.pitch)));
    tracing::debug!(tracks = smf.tracks.len(), notes = notes.len(), "midi file parsed");

    Ok(MidiImport {
        name: track_name(&smf),
        notes,
    })
}

fn push_note(
    notes: &mut Vec<RawNote>,
    clock: &TickClock,
    pitch: u8,
    start: u64,
    end: u64,
    vel: u8,
    track: usize,
) {
    if end <= start {
        return;
    }
    let start_ms = clock.to_ms(start);
    notes.push(RawNote {
        pitch,
        start_ms,
        duration_ms: clock.to_ms(end) - start_ms,
        velocity: vel as f32 / 127.0,
        track,
    });
}

fn track_name(smf: &Smf) -> Option<String> {
    smf.tracks.first()?.iter().find_map(|event| match event.kind {
        TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
            let name = String::from_utf8_lossy(raw).trim().to_owned();
            (!name.is_empty()).then_some(name)
        }
        _ => None,
    })
}

#[derive(Debug, Clone, Copy)]
struct TempoSegment {
    tick: u64,
    ms: f64,
    ms_per_tick: f64,
}

/// Tick to millisecond conversion for one file.
#[derive(Debug)]
enum TickClock {
    Metrical(Vec<TempoSegment>),
    Timecode { ms_per_tick: f64 },
}

impl TickClock {
    fn new(smf: &Smf) -> Self {
        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int().max(1) as f64,
            Timing::Timecode(fps, subframes) => {
                let per_second = fps.as_f32() as f64 * subframes.max(1) as f64;
                return TickClock::Timecode {
                    ms_per_tick: 1000.0 / per_second,
                };
            }
        };
        let ms_per_tick = |tempo_us: u32| tempo_us as f64 / 1000.0 / ticks_per_beat;

        // tempo events may live on any track and apply to all of them
        let mut changes = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    changes.push((tick, tempo.as_int()));
                }
            }
        }
        changes.sort_by_key(|&(tick, _)| tick);

        let mut segments = vec![TempoSegment {
            tick: 0,
            ms: 0.0,
            ms_per_tick: ms_per_tick(DEFAULT_TEMPO_US),
        }];
        for (tick, tempo) in changes {
            let Some(last) = segments.last_mut() else {
                break;
            };
            if tick == last.tick {
                last.ms_per_tick = ms_per_tick(tempo);
                continue;
            }
            let ms = last.ms + (tick - last.tick) as f64 * last.ms_per_tick;
            segments.push(TempoSegment {
                tick,
                ms,
                ms_per_tick: ms_per_tick(tempo),
            });
        }
        TickClock::Metrical(segments)
    }

    fn to_ms(&self, tick: u64) -> f64 {
        match self {
            TickClock::Timecode { ms_per_tick } => tick as f64 * ms_per_tick,
            TickClock::Metrical(segments) => {
                let index = segments.partition_point(|s| s.tick <= tick).saturating_sub(1);
                let segment = segments[index];
                segment.ms + (tick - segment.tick) as f64 * segment.ms_per_tick
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u4, u7, u15, u24, u28};
    use midly::{Format, Header, TrackEvent};

    fn at(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        at(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
        )
    }

    fn off(delta: u32, key: u8) -> TrackEvent<'static> {
        at(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(64),
                },
            },
        )
    }

    fn tempo(delta: u32, us_per_beat: u32) -> TrackEvent<'static> {
        at(delta, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_beat))))
    }

    fn end() -> TrackEvent<'static> {
        at(0, TrackEventKind::Meta(MetaMessage::EndOfTrack))
    }

    fn encode(tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let smf = Smf {
            header: Header::new(Format::Parallel, Timing::Metrical(u15::new(480))),
            tracks,
        };
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }

    #[test]
    fn tempo_changes_bend_the_tick_clock() {
        // 120 bpm for two beats, then 240 bpm
        let conductor = vec![tempo(0, 500_000), tempo(960, 250_000), end()];
        let melody = vec![
            on(0, 60, 100),
            off(480, 60),
            on(0, 64, 100),
            on(480, 67, 100),
            off(480, 67),
            off(0, 64),
            end(),
        ];
        let import = parse(&encode(vec![conductor, melody])).unwrap();

        let by_pitch = |pitch: u8| import.notes.iter().find(|n| n.pitch == pitch).unwrap();
        let first = by_pitch(60);
        assert_close(first.start_ms, 0.0);
        assert_close(first.duration_ms, 500.0);

        // spans the change: one beat at 500 ms plus one at 250 ms
        let across = by_pitch(64);
        assert_close(across.start_ms, 500.0);
        assert_close(across.duration_ms, 750.0);

        let fast = by_pitch(67);
        assert_close(fast.start_ms, 1000.0);
        assert_close(fast.duration_ms, 250.0);
    }

    #[test]
    fn zero_velocity_note_on_closes_the_note() {
        let track = vec![on(0, 64, 100), on(240, 64, 0), end()];
        let import = parse(&encode(vec![track])).unwrap();

        assert_eq!(import.notes.len(), 1);
        let note = &import.notes[0];
        assert_close(note.duration_ms, 250.0);
        assert_eq!(note.velocity, 100.0 / 127.0);
    }

    #[test]
    fn tracks_are_merged_and_keep_their_index() {
        let name = at(0, TrackEventKind::Meta(MetaMessage::TrackName(b"Nocturne")));
        let left = vec![name, on(480, 48, 64), off(480, 48), end()];
        let right = vec![on(0, 72, 127), off(960, 72), end()];
        let import = parse(&encode(vec![left, right])).unwrap();

        assert_eq!(import.name.as_deref(), Some("Nocturne"));
        let order: Vec<_> = import.notes.iter().map(|n| (n.pitch, n.track)).collect();
        assert_eq!(order, vec![(72, 1), (48, 0)]);
        assert_eq!(import.notes[0].velocity, 1.0);
    }

    #[test]
    fn held_note_stops_at_track_end() {
        let track = vec![on(0, 60, 90), at(960, TrackEventKind::Meta(MetaMessage::EndOfTrack))];
        let import = parse(&encode(vec![track])).unwrap();
        assert_close(import.notes[0].duration_ms, 1000.0);
    }

    #[test]
    fn repeated_key_pairs_first_in_first_out() {
        let track = vec![on(0, 60, 50), on(240, 60, 100), off(240, 60), off(240, 60), end()];
        let import = parse(&encode(vec![track])).unwrap();

        assert_eq!(import.notes.len(), 2);
        assert_eq!(import.notes[0].velocity, 50.0 / 127.0);
        assert_close(import.notes[0].duration_ms, 500.0);
        assert_close(import.notes[1].start_ms, 250.0);
        assert_close(import.notes[1].duration_ms, 500.0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse(b"not a midi file").is_err());
    }
}
