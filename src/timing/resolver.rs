use super::{NoteId, Timeline};
use std::collections::BTreeSet;

/// Ids of the notes sounding at one instant.
pub type ActiveSet = BTreeSet<NoteId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Continuing,
    Ended,
    Unaffected,
}

/// Delta between two consecutive resolutions. Ids are in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transitions {
    pub started: Vec<NoteId>,
    pub continuing: Vec<NoteId>,
    pub ended: Vec<NoteId>,
}

impl Transitions {
    pub fn classify(&self, id: NoteId) -> Transition {
        if self.started.binary_search(&id).is_ok() {
            Transition::Started
        } else if self.continuing.binary_search(&id).is_ok() {
            Transition::Continuing
        } else if self.ended.binary_search(&id).is_ok() {
            Transition::Ended
        } else {
            Transition::Unaffected
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.started.is_empty() && self.ended.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub active: ActiveSet,
    pub transitions: Transitions,
}

/// Derives the active set from interval containment on every call and
/// classifies each note against the previous call.
#[derive(Debug, Default)]
pub struct Resolver {
    previous: ActiveSet,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous active set. Must be called on every discontinuous
    /// time change so the next resolution reports all active notes as started.
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    pub fn resolve(&mut self, time_ms: f64, timeline: &Timeline) -> Resolution {
        let active = active_at(time_ms, timeline);

        let mut transitions = Transitions::default();
        for id in &active {
            if self.previous.contains(id) {
                transitions.continuing.push(*id);
            } else {
                transitions.started.push(*id);
            }
        }
        transitions.ended = self.previous.difference(&active).copied().collect();

        if !transitions.is_quiet() {
            tracing::trace!(
                time_ms,
                started = ?transitions.started,
                ended = ?transitions.ended,
                "active set changed"
            );
        }

        self.previous = active.clone();
        Resolution {
            active,
            transitions,
        }
    }
}

/// `{e : e.start <= t < e.start + e.duration}`, independent of any history.
pub fn active_at(time_ms: f64, timeline: &Timeline) -> ActiveSet {
    if !time_ms.is_finite() {
        tracing::warn!(time_ms, "non-finite playback time, treating as silence");
        return ActiveSet::new();
    }
    timeline
        .overlapping(time_ms, time_ms)
        .filter(|e| e.contains(time_ms))
        .map(|e| e.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::NoteEvent;

    fn note(id: NoteId, start_ms: f64, duration_ms: f64) -> NoteEvent {
        NoteEvent {
            id,
            pitch: 60 + id as u8,
            start_ms,
            duration_ms,
            velocity: 0.8,
            track: 0,
        }
    }

    fn timeline(notes: Vec<NoteEvent>) -> Timeline {
        Timeline::new(notes).unwrap()
    }

    fn ids(set: &ActiveSet) -> Vec<NoteId> {
        set.iter().copied().collect()
    }

    #[test]
    fn single_note_lifecycle() {
        let tl = timeline(vec![note(0, 0.0, 500.0)]);
        let mut resolver = Resolver::new();

        let r = resolver.resolve(0.0, &tl);
        assert_eq!(ids(&r.active), vec![0]);
        assert_eq!(r.transitions.classify(0), Transition::Started);

        let r = resolver.resolve(250.0, &tl);
        assert_eq!(ids(&r.active), vec![0]);
        assert_eq!(r.transitions.classify(0), Transition::Continuing);

        let r = resolver.resolve(500.0, &tl);
        assert!(r.active.is_empty());
        assert_eq!(r.transitions.classify(0), Transition::Ended);

        let r = resolver.resolve(600.0, &tl);
        assert_eq!(r.transitions.classify(0), Transition::Unaffected);
    }

    #[test]
    fn overlapping_notes() {
        let tl = timeline(vec![note(0, 0.0, 1000.0), note(1, 500.0, 1000.0)]);
        let mut resolver = Resolver::new();
        resolver.resolve(400.0, &tl);

        let r = resolver.resolve(600.0, &tl);
        assert_eq!(ids(&r.active), vec![0, 1]);
        assert_eq!(r.transitions.classify(0), Transition::Continuing);
        assert_eq!(r.transitions.classify(1), Transition::Started);
    }

    #[test]
    fn repeated_time_is_idempotent() {
        let tl = timeline(vec![note(0, 0.0, 1000.0), note(1, 500.0, 1000.0)]);
        let mut resolver = Resolver::new();
        resolver.resolve(600.0, &tl);

        for _ in 0..3 {
            let r = resolver.resolve(600.0, &tl);
            assert!(r.transitions.started.is_empty());
            assert!(r.transitions.ended.is_empty());
            assert_eq!(r.transitions.continuing, vec![0, 1]);
        }
    }

    #[test]
    fn membership_ignores_call_history() {
        let tl = timeline(vec![
            note(0, 0.0, 300.0),
            note(1, 100.0, 2000.0),
            note(2, 900.0, 50.0),
            note(3, 900.0, 400.0),
        ]);
        let times = [950.0, 0.0, 1200.0, 120.0, 950.0, 5000.0, 299.999, 300.0];

        let mut resolver = Resolver::new();
        for t in times {
            let expected: ActiveSet = tl.events().iter().filter(|e| e.contains(t)).map(|e| e.id).collect();
            assert_eq!(resolver.resolve(t, &tl).active, expected, "t = {t}");
        }
    }

    #[test]
    fn ended_is_reported_after_seeking_past_the_note() {
        let tl = timeline(vec![note(0, 0.0, 500.0)]);
        let mut resolver = Resolver::new();
        resolver.resolve(200.0, &tl);

        let r = resolver.resolve(10_000.0, &tl);
        assert_eq!(r.transitions.ended, vec![0]);
    }

    #[test]
    fn reset_reclassifies_active_notes_as_started() {
        let tl = timeline(vec![note(0, 0.0, 1000.0)]);
        let mut resolver = Resolver::new();
        resolver.resolve(700.0, &tl);

        resolver.reset();
        let r = resolver.resolve(0.0, &tl);
        assert_eq!(r.transitions.started, vec![0]);
        assert!(r.transitions.ended.is_empty());
        assert!(r.transitions.continuing.is_empty());
    }

    #[test]
    fn backward_seek_reactivates_notes() {
        let tl = timeline(vec![note(0, 100.0, 100.0), note(1, 500.0, 100.0)]);
        let mut resolver = Resolver::new();
        resolver.resolve(550.0, &tl);

        let r = resolver.resolve(150.0, &tl);
        assert_eq!(r.transitions.started, vec![0]);
        assert_eq!(r.transitions.ended, vec![1]);
    }

    #[test]
    fn started_and_ended_alternate_without_discontinuity() {
        let tl = timeline(vec![note(0, 0.0, 40.0), note(1, 30.0, 40.0), note(2, 100.0, 5.0)]);
        let mut resolver = Resolver::new();
        let mut open = std::collections::HashMap::new();

        let mut t = 0.0;
        while t < 200.0 {
            let r = resolver.resolve(t, &tl);
            for id in r.transitions.started {
                assert!(open.insert(id, ()).is_none(), "double start of {id}");
            }
            for id in r.transitions.ended {
                assert!(open.remove(&id).is_some(), "end without start of {id}");
            }
            t += 3.0;
        }
        assert!(open.is_empty());
    }

    #[test]
    fn nan_time_resolves_to_silence() {
        let tl = timeline(vec![note(0, 0.0, 500.0)]);
        let mut resolver = Resolver::new();
        resolver.resolve(10.0, &tl);
        let r = resolver.resolve(f64::NAN, &tl);
        assert!(r.active.is_empty());
        assert_eq!(r.transitions.ended, vec![0]);
    }
}
