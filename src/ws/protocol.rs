// Wire protocol for the chat WebSocket.
// Every frame is a JSON object carrying a `type` discriminator; inbound
// payloads sit under `data`, outbound frames are flat.

use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageKind, Room, UserStatus};

/// An inbound frame, decoded. Unknown `type` values fail deserialization
/// and are dropped by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Message {
        #[serde(default)]
        room_id: Option<u64>,
        data: MessagePayload,
    },
    ReadReceipt {
        data: ReadReceiptPayload,
    },
    Typing {
        room_id: u64,
        user_id: u64,
        data: TypingPayload,
    },
    Pong,
    UserStatusChange {
        data: UserStatusPayload,
    },
    RoomCreated {
        data: RoomPayload,
    },
}

impl Envelope {
    /// The room this envelope concerns, when it concerns one.
    pub fn room_id(&self) -> Option<u64> {
        match self {
            Envelope::Message { room_id, data } => Some(room_id.unwrap_or(data.message.room_id)),
            Envelope::ReadReceipt { data } => Some(data.room_id),
            Envelope::Typing { room_id, .. } => Some(*room_id),
            Envelope::RoomCreated { data } => Some(data.room.id),
            Envelope::Pong | Envelope::UserStatusChange { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub message: Message,
}

/// Read markers travel as a single high-water mark: every message in the
/// room with an id at or below `last_read_message_id` is read by `user_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadReceiptPayload {
    pub room_id: u64,
    pub last_read_message_id: u64,
    pub user_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    pub is_typing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserStatusPayload {
    pub user_id: u64,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomPayload {
    pub room: Room,
}

/// An outbound frame. Serialized shape mirrors what the server expects:
/// the `type` discriminator plus a flat payload (typing keeps its nested
/// `data` object, matching the broadcast format).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        room_id: u64,
        content: String,
        message_type: MessageKind,
        mentions: Vec<u64>,
        recipients: Vec<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_size: Option<i64>,
    },
    Typing {
        room_id: u64,
        data: TypingPayload,
    },
    ReadReceipt {
        message_id: u64,
    },
    Ping,
}
