// Active-room message timeline: ordered, deduplicated history with
// backward pagination, live-append merging, read receipts, and viewport
// bookkeeping.
//
// The server serves history newest-first; the timeline stores it ascending
// by id. All merges are idempotent on the message id, so replays after a
// reconnect cannot produce duplicates.

use log::debug;

use crate::models::Message;

/// Capture of a fetch-in-flight. The epoch is bumped on every room
/// activation, so a response that resolves after the user has moved on is
/// recognized as stale and discarded instead of applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub room_id: u64,
    pub epoch: u64,
    pub page: u32,
}

/// Result of a backward-pagination prepend. `anchor` is the id of the
/// previously-first message; the caller scrolls back to it so the viewport
/// does not jump after the prepend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prepended {
    pub added: usize,
    pub anchor: Option<u64>,
}

pub struct Timeline {
    local_user: u64,
    room_id: Option<u64>,
    messages: Vec<Message>,
    page: u32,
    has_more: bool,
    fetching: bool,
    epoch: u64,
    at_bottom: bool,
    unseen: u32,
}

impl Timeline {
    pub fn new(local_user: u64) -> Self {
        Timeline {
            local_user,
            room_id: None,
            messages: Vec::new(),
            page: 0,
            has_more: true,
            fetching: false,
            epoch: 0,
            at_bottom: true,
            unseen: 0,
        }
    }

    pub fn room_id(&self) -> Option<u64> {
        self.room_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn unseen(&self) -> u32 {
        self.unseen
    }

    /// Switch the timeline to `room_id` and return the ticket for the
    /// initial page fetch. Returns `None` when the room is already active
    /// (compared by id), which guards against redundant reloads.
    pub fn activate(&mut self, room_id: u64) -> Option<FetchTicket> {
        if self.room_id == Some(room_id) {
            return None;
        }
        self.room_id = Some(room_id);
        self.messages.clear();
        self.page = 0;
        self.has_more = true;
        self.fetching = true;
        self.epoch += 1;
        self.at_bottom = true;
        self.unseen = 0;
        Some(FetchTicket {
            room_id,
            epoch: self.epoch,
            page: 1,
        })
    }

    /// Begin a backward-pagination fetch, unless history is exhausted or a
    /// fetch is already in flight.
    pub fn begin_older_fetch(&mut self) -> Option<FetchTicket> {
        let room_id = self.room_id?;
        if !self.has_more || self.fetching {
            return None;
        }
        self.fetching = true;
        Some(FetchTicket {
            room_id,
            epoch: self.epoch,
            page: self.page + 1,
        })
    }

    /// Install the first page. `newest_first` is the server-native order;
    /// it is reversed to ascending for storage.
    pub fn complete_initial(
        &mut self,
        ticket: &FetchTicket,
        newest_first: Vec<Message>,
        page_size: u32,
    ) {
        if self.is_stale(ticket) {
            debug!(
                "Discarding stale initial page for room {} (epoch {})",
                ticket.room_id, ticket.epoch
            );
            return;
        }
        self.fetching = false;
        self.page = ticket.page;
        self.has_more = newest_first.len() == page_size as usize;
        self.messages.clear();
        for message in newest_first.into_iter().rev() {
            insert_by_id(&mut self.messages, message);
        }
    }

    /// Prepend an older page above the loaded window.
    pub fn complete_older(
        &mut self,
        ticket: &FetchTicket,
        newest_first: Vec<Message>,
        page_size: u32,
    ) -> Option<Prepended> {
        if self.is_stale(ticket) {
            debug!(
                "Discarding stale history page {} for room {}",
                ticket.page, ticket.room_id
            );
            return None;
        }
        self.fetching = false;
        self.page = ticket.page;
        self.has_more = newest_first.len() == page_size as usize;

        let anchor = self.messages.first().map(|m| m.id);
        let mut added = 0;
        for message in newest_first.into_iter().rev() {
            if insert_by_id(&mut self.messages, message) {
                added += 1;
            }
        }
        Some(Prepended { added, anchor })
    }

    /// A fetch failed: release the in-flight guard and leave the list and
    /// `has_more` untouched so the user can retry by scrolling again.
    pub fn fail_fetch(&mut self, ticket: &FetchTicket) {
        if self.is_stale(ticket) {
            return;
        }
        self.fetching = false;
    }

    /// Merge a live message. Returns true when it was appended to the
    /// active room's list; duplicates and messages for other rooms are
    /// ignored here (the room store keeps their unread counts).
    pub fn apply_message(&mut self, message: Message) -> bool {
        if self.room_id != Some(message.room_id) {
            return false;
        }
        if !insert_by_id(&mut self.messages, message) {
            return false;
        }
        if !self.at_bottom {
            self.unseen += 1;
        }
        true
    }

    /// Merge a read marker into every loaded peer-authored message at or
    /// below the high-water mark. Idempotent: reapplying a marker already
    /// merged changes nothing.
    pub fn apply_read_receipt(&mut self, room_id: u64, user_id: u64, last_read: u64) -> bool {
        if self.room_id != Some(room_id) {
            return false;
        }
        let mut changed = false;
        for message in &mut self.messages {
            if message.id > last_read {
                break;
            }
            if message.sender.id == user_id {
                continue;
            }
            changed |= message.mark_read_by(user_id);
        }
        changed
    }

    /// Ids of loaded peer messages we have not read yet, for the
    /// mark-as-read batch.
    pub fn unread_peer_ids(&self) -> Vec<u64> {
        self.messages
            .iter()
            .filter(|m| m.sender.id != self.local_user && !m.read_by_user(self.local_user))
            .map(|m| m.id)
            .collect()
    }

    /// Record our own read marker on the given messages after a successful
    /// mark-as-read call, so the next batch does not resend them.
    pub fn note_locally_read(&mut self, ids: &[u64]) {
        for message in &mut self.messages {
            if ids.contains(&message.id) {
                message.mark_read_by(self.local_user);
            }
        }
    }

    pub fn set_viewport(&mut self, at_bottom: bool) {
        self.at_bottom = at_bottom;
        if at_bottom {
            self.unseen = 0;
        }
    }

    pub fn jump_to_bottom(&mut self) {
        self.at_bottom = true;
        self.unseen = 0;
    }

    fn is_stale(&self, ticket: &FetchTicket) -> bool {
        ticket.epoch != self.epoch || Some(ticket.room_id) != self.room_id
    }
}

/// Insert keeping the list ascending and duplicate-free by id. Returns
/// false when the id was already present.
fn insert_by_id(list: &mut Vec<Message>, message: Message) -> bool {
    match list.binary_search_by(|m| m.id.cmp(&message.id)) {
        Ok(_) => false,
        Err(pos) => {
            list.insert(pos, message);
            true
        }
    }
}
