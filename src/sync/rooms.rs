// Room list bookkeeping: unread counts, last-message denormalization,
// per-member read markers, and presence.

use std::collections::HashMap;

use log::debug;

use crate::models::{Message, Room, UserStatus};

/// Locally-held room list. Rooms are created when the server returns them
/// (bootstrap or a `room_created` push) and never deleted here.
pub struct RoomStore {
    local_user: u64,
    rooms: Vec<Room>,
    active: Option<u64>,
    /// Per-room, per-user last-read high-water marks.
    read_markers: HashMap<u64, HashMap<u64, u64>>,
    presence: HashMap<u64, UserStatus>,
}

impl RoomStore {
    pub fn new(local_user: u64) -> Self {
        RoomStore {
            local_user,
            rooms: Vec::new(),
            active: None,
            read_markers: HashMap::new(),
            presence: HashMap::new(),
        }
    }

    /// Replace the whole list with what the server returned.
    pub fn replace_all(&mut self, rooms: Vec<Room>) {
        self.rooms = rooms;
        if let Some(active) = self.active {
            self.clear_unread(active);
        }
    }

    /// Insert a server-pushed room, or ignore the push when the room is
    /// already known (private rooms are frequently re-announced).
    pub fn upsert(&mut self, room: Room) {
        if self.rooms.iter().any(|r| r.id == room.id) {
            debug!("Room {} already known; keeping existing entry", room.id);
            return;
        }
        self.rooms.insert(0, room);
    }

    /// Mark `room_id` active. The active room never shows unread messages.
    pub fn set_active(&mut self, room_id: u64) {
        self.active = Some(room_id);
        self.clear_unread(room_id);
    }

    pub fn active(&self) -> Option<u64> {
        self.active
    }

    /// Fold a live message into the room list: refresh `last_message` and
    /// bump the unread count when the room is not the active one and the
    /// message came from a peer.
    pub fn apply_message(&mut self, message: &Message) {
        let active = self.active;
        let local_user = self.local_user;
        if let Some(room) = self.rooms.iter_mut().find(|r| r.id == message.room_id) {
            let inactive = active != Some(room.id);
            let from_peer = message.sender.id != local_user;
            if inactive && from_peer {
                room.unread_count += 1;
            }
            room.last_message = Some(message.clone());
        }
    }

    /// Record a reader's high-water mark for a room.
    pub fn apply_read_marker(&mut self, room_id: u64, user_id: u64, last_read: u64) {
        let markers = self.read_markers.entry(room_id).or_default();
        let entry = markers.entry(user_id).or_insert(0);
        if last_read > *entry {
            *entry = last_read;
        }
    }

    pub fn read_marker(&self, room_id: u64, user_id: u64) -> Option<u64> {
        self.read_markers.get(&room_id)?.get(&user_id).copied()
    }

    pub fn apply_status(&mut self, user_id: u64, status: UserStatus) {
        self.presence.insert(user_id, status);
    }

    pub fn status(&self, user_id: u64) -> Option<UserStatus> {
        self.presence.get(&user_id).copied()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn get(&self, room_id: u64) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    pub fn member_ids(&self, room_id: u64) -> Vec<u64> {
        self.get(room_id).map(Room::member_ids).unwrap_or_default()
    }

    pub fn unread(&self, room_id: u64) -> u32 {
        self.get(room_id).map(|r| r.unread_count).unwrap_or(0)
    }

    fn clear_unread(&mut self, room_id: u64) {
        if let Some(room) = self.rooms.iter_mut().find(|r| r.id == room_id) {
            room.unread_count = 0;
        }
    }
}
