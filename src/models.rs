use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as embedded in messages and room member lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Private,
    Group,
}

/// A chat message as the server serves it, both over REST and inside
/// `message` frames. The id is allocated by the server and increases
/// monotonically, which makes it the ordering and dedup key.
///
/// Immutable after creation except for `read_by`, which only grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub room_id: u64,
    #[serde(default)]
    pub sender_id: u64,
    pub sender: UserSummary,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "file_size_is_zero")]
    pub file_size: i64,
    #[serde(default)]
    pub read_by: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

fn file_size_is_zero(size: &i64) -> bool {
    *size == 0
}

impl Message {
    /// Whether `user_id` already appears in the read set.
    pub fn read_by_user(&self, user_id: u64) -> bool {
        self.read_by.contains(&user_id)
    }

    /// Record that `user_id` has read this message. Idempotent.
    pub fn mark_read_by(&mut self, user_id: u64) -> bool {
        if self.read_by_user(user_id) {
            return false;
        }
        self.read_by.push(user_id);
        true
    }
}

/// A conversation context, direct (`private`) or `group`.
///
/// Rooms come into existence locally when the server returns them, either
/// from the room-list endpoint or inside a `room_created` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub members: Vec<UserSummary>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn member_ids(&self) -> Vec<u64> {
        self.members.iter().map(|m| m.id).collect()
    }
}

/// Descriptor of an already-uploaded attachment, as returned by the upload
/// endpoint. Passed to the composer when sending image/file messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMeta {
    pub url: String,
    pub name: String,
    pub size: i64,
}
