// Typing indicator state, per room.
// Entries carry a freshness deadline so a peer that stops sending updates
// (or disconnects mid-word) fades out instead of typing forever.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const TYPING_TTL: Duration = Duration::from_secs(5);

pub struct TypingTracker {
    ttl: Duration,
    by_room: HashMap<u64, HashMap<u64, Instant>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::with_ttl(TYPING_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        TypingTracker {
            ttl,
            by_room: HashMap::new(),
        }
    }

    /// Fold in a typing frame. `now` is passed in so tests can replay
    /// schedules without sleeping.
    pub fn observe(&mut self, room_id: u64, user_id: u64, is_typing: bool, now: Instant) {
        let room = self.by_room.entry(room_id).or_default();
        if is_typing {
            room.insert(user_id, now + self.ttl);
        } else {
            room.remove(&user_id);
        }
    }

    /// Users currently typing in `room_id`; expired entries are pruned.
    pub fn typing_in(&mut self, room_id: u64, now: Instant) -> Vec<u64> {
        let Some(room) = self.by_room.get_mut(&room_id) else {
            return Vec::new();
        };
        room.retain(|_, deadline| *deadline > now);
        let mut users: Vec<u64> = room.keys().copied().collect();
        users.sort_unstable();
        users
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}
