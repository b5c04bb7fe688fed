mod clock;
mod falling;
mod resolver;
mod timeline;

pub use clock::{Jump, PlaybackCursor};
pub use falling::{FallConfig, FallingNote, falling_notes};
pub use resolver::{ActiveSet, Resolution, Resolver, Transition, Transitions, active_at};
pub use timeline::{NoteEvent, NoteId, RawNote, Timeline, TimelineError, is_black_key, note_name};
