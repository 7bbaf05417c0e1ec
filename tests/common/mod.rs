// Common test utilities for integration tests
// This module contains shared code for all integration tests: sample data
// builders, raw frame builders, and an in-memory REST collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::LevelFilter;
use tokio::sync::{mpsc, Mutex};

use colloquy::api::MessageApi;
use colloquy::{
    ChatClient, ClientConfig, ClientError, Message, MessageKind, Notice, Room, RoomKind,
    UserSummary,
};

/// The session user all test clients run as.
pub const LOCAL_USER: u64 = 1;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub fn user(id: u64, username: &str) -> UserSummary {
    UserSummary {
        id,
        username: username.to_string(),
        nickname: String::new(),
        avatar: String::new(),
        status: None,
    }
}

pub fn message(id: u64, room_id: u64, sender: u64) -> Message {
    Message {
        id,
        room_id,
        sender_id: sender,
        sender: user(sender, &format!("user{}", sender)),
        content: format!("message {}", id),
        kind: MessageKind::Text,
        file_url: String::new(),
        file_name: String::new(),
        file_size: 0,
        read_by: Vec::new(),
        created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
    }
}

pub fn room(id: u64, name: &str, member_ids: &[u64]) -> Room {
    Room {
        id,
        name: name.to_string(),
        kind: if member_ids.len() > 2 {
            RoomKind::Group
        } else {
            RoomKind::Private
        },
        avatar: String::new(),
        members: member_ids
            .iter()
            .map(|&id| user(id, &format!("user{}", id)))
            .collect(),
        member_count: member_ids.len() as u32,
        last_message: None,
        unread_count: 0,
        created_at: None,
    }
}

/// A page of messages in server-native (newest-first) order.
pub fn newest_first(ids: &[u64], room_id: u64, sender: u64) -> Vec<Message> {
    ids.iter().map(|&id| message(id, room_id, sender)).collect()
}

// ---- raw frame builders, matching the observed wire shapes -------------

pub fn message_frame(msg: &Message) -> String {
    serde_json::json!({
        "type": "message",
        "room_id": msg.room_id,
        "data": { "message": msg },
    })
    .to_string()
}

pub fn read_receipt_frame(room_id: u64, last_read_message_id: u64, user_id: u64) -> String {
    serde_json::json!({
        "type": "read_receipt",
        "data": {
            "room_id": room_id,
            "last_read_message_id": last_read_message_id,
            "user_id": user_id,
        },
    })
    .to_string()
}

pub fn typing_frame(room_id: u64, user_id: u64, is_typing: bool) -> String {
    serde_json::json!({
        "type": "typing",
        "room_id": room_id,
        "user_id": user_id,
        "data": { "is_typing": is_typing },
    })
    .to_string()
}

/// In-memory stand-in for the chat REST API. Pages are keyed by
/// (room, page number) and served newest-first, exactly like the real
/// collaborator; fetches can be delayed or failed to exercise the
/// cancellation and error paths.
pub struct FakeApi {
    rooms: Mutex<Vec<Room>>,
    pages: Mutex<HashMap<(u64, u32), Vec<Message>>>,
    delays: Mutex<HashMap<u64, Duration>>,
    failing: Mutex<bool>,
    read_batches: Mutex<Vec<Vec<u64>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeApi {
            rooms: Mutex::new(Vec::new()),
            pages: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
            read_batches: Mutex::new(Vec::new()),
        })
    }

    pub async fn set_rooms(&self, rooms: Vec<Room>) {
        *self.rooms.lock().await = rooms;
    }

    pub async fn set_page(&self, room_id: u64, page: u32, messages: Vec<Message>) {
        self.pages.lock().await.insert((room_id, page), messages);
    }

    /// Delay every history fetch for `room_id`, to simulate a slow network.
    pub async fn set_delay(&self, room_id: u64, delay: Duration) {
        self.delays.lock().await.insert(room_id, delay);
    }

    /// Fail every history fetch while set.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    /// Every batch passed to mark_read, in call order.
    pub async fn read_batches(&self) -> Vec<Vec<u64>> {
        self.read_batches.lock().await.clone()
    }
}

#[async_trait]
impl MessageApi for FakeApi {
    async fn fetch_rooms(&self) -> Result<Vec<Room>, ClientError> {
        Ok(self.rooms.lock().await.clone())
    }

    async fn fetch_messages(
        &self,
        room_id: u64,
        page: u32,
        _limit: u32,
    ) -> Result<Vec<Message>, ClientError> {
        let delay = self.delays.lock().await.get(&room_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().await {
            return Err(ClientError::Fetch("injected failure".to_string()));
        }
        Ok(self
            .pages
            .lock()
            .await
            .get(&(room_id, page))
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(&self, message_ids: &[u64]) -> Result<(), ClientError> {
        self.read_batches.lock().await.push(message_ids.to_vec());
        Ok(())
    }
}

/// Client configuration pointing at nothing routable, with compressed
/// timings. Connection-level tests drive the state machine directly, so no
/// real server is needed.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(
        "ws://127.0.0.1:9/ws",
        "http://127.0.0.1:9/api",
        LOCAL_USER,
        "test-token",
    );
    config.heartbeat_interval = Duration::from_millis(50);
    config.reconnect_base = Duration::from_millis(10);
    config.reconnect_cap = Duration::from_millis(80);
    config.page_size = 20;
    config
}

pub fn setup_test_client(api: Arc<FakeApi>) -> (ChatClient, mpsc::Receiver<Notice>) {
    setup_logging();
    ChatClient::with_api(test_config(), api)
}
