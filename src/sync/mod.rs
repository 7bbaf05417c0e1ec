// Conversation reconciliation for Colloquy.
// Merges dispatched events and paginated REST history into a consistent,
// deduplicated, ordered local view: per-room message lists, unread counts,
// read markers, and typing state.

pub mod rooms;
pub mod timeline;
pub mod typing;

pub use rooms::RoomStore;
pub use timeline::{FetchTicket, Prepended, Timeline};
pub use typing::TypingTracker;

/// All reconciliation state, mutated only from dispatch and direct client
/// calls so event application stays sequential.
pub struct ChatState {
    pub rooms: RoomStore,
    pub timeline: Timeline,
    pub typing: TypingTracker,
}

impl ChatState {
    pub fn new(local_user: u64) -> Self {
        ChatState {
            rooms: RoomStore::new(local_user),
            timeline: Timeline::new(local_user),
            typing: TypingTracker::new(),
        }
    }
}
