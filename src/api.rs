// REST collaborator for history pagination, read marking, and the room
// list bootstrap. Everything else the HTTP API offers is consumed by
// non-core UI and does not belong here.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::models::{Message, Room};

/// Standard response envelope the chat API wraps every payload in.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Serialize)]
struct MarkReadRequest<'a> {
    message_ids: &'a [u64],
}

/// The slice of the REST API the synchronization layer depends on. Behind
/// a trait so tests can substitute an in-memory collaborator.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Room list bootstrap.
    async fn fetch_rooms(&self) -> Result<Vec<Room>, ClientError>;

    /// One page of room history in server-native (newest-first) order.
    async fn fetch_messages(
        &self,
        room_id: u64,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Message>, ClientError>;

    /// Mark the given messages as read by the session user. No meaningful
    /// response body.
    async fn mark_read(&self, message_ids: &[u64]) -> Result<(), ClientError>;
}

/// `reqwest`-backed implementation against the live chat API.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        RestClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClientError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ClientError::Fetch(e.to_string()))?;
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ClientError::Fetch(e.to_string()))?;
        body.data
            .ok_or_else(|| ClientError::Fetch(format!("empty response ({}): {}", body.code, body.message)))
    }
}

#[async_trait]
impl MessageApi for RestClient {
    async fn fetch_rooms(&self) -> Result<Vec<Room>, ClientError> {
        self.get_json(&format!("{}/rooms", self.base_url)).await
    }

    async fn fetch_messages(
        &self,
        room_id: u64,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Message>, ClientError> {
        let url = format!(
            "{}/rooms/{}/messages?page={}&limit={}",
            self.base_url, room_id, page, limit
        );
        debug!("Fetching history page {} for room {}", page, room_id);
        self.get_json(&url).await
    }

    async fn mark_read(&self, message_ids: &[u64]) -> Result<(), ClientError> {
        let url = format!("{}/messages/read", self.base_url);
        self.http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&MarkReadRequest { message_ids })
            .send()
            .await
            .map_err(|e| ClientError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ClientError::Fetch(e.to_string()))?;
        Ok(())
    }
}
