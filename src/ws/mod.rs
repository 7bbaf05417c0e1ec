// Chat client module for Colloquy.
// This file is the entry point for the WebSocket synchronization client:
// it owns the connection manager, the event dispatcher, the reconciliation
// state, and the REST collaborator handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub mod connection;
pub mod dispatch;
pub mod outbound;
pub mod protocol;

pub use connection::{ConnAction, ConnState, ConnectionFsm, ReconnectPolicy};
pub use dispatch::{EventDispatcher, Subscription};

use crate::api::{MessageApi, RestClient};
use crate::error::ClientError;
use crate::models::{Message, Room, UserStatus};
use crate::sync::timeline::Prepended;
use crate::sync::ChatState;
use protocol::Envelope;

/// Tunable client configuration. Everything that governs timing is
/// injectable so tests can run against compressed schedules.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://host/ws`.
    pub ws_url: String,
    /// REST base, e.g. `http://host/api`.
    pub api_url: String,
    pub user_id: u64,
    pub token: String,
    pub heartbeat_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub page_size: u32,
}

impl ClientConfig {
    pub fn new(ws_url: &str, api_url: &str, user_id: u64, token: &str) -> Self {
        ClientConfig {
            ws_url: ws_url.to_string(),
            api_url: api_url.to_string(),
            user_id,
            token: token.to_string(),
            heartbeat_interval: Duration::from_secs(20),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            page_size: 20,
        }
    }

    /// Derive both endpoints from a single server address, accepting
    /// `http(s)://host` or a bare `host`.
    pub fn from_server(server: &str, user_id: u64, token: &str) -> Self {
        let http_base = if server.starts_with("http://") || server.starts_with("https://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", server.trim_end_matches('/'))
        };
        let ws_base = if let Some(rest) = http_base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = http_base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", http_base)
        };
        Self::new(
            &format!("{}/ws", ws_base),
            &format!("{}/api", http_base),
            user_id,
            token,
        )
    }

    pub(crate) fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: self.reconnect_base,
            cap: self.reconnect_cap,
        }
    }
}

/// Transient, user-facing status signals. Rendered as dismissible toasts;
/// none of them interrupts the chat flow.
#[derive(Debug, Clone)]
pub enum Notice {
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
    SendFailed,
    FetchFailed { room_id: u64 },
}

/// The synchronization client. Cheap to clone; all state is shared.
///
/// One live socket at a time, owned exclusively by this client. The UI
/// observes it through the notice channel, the envelope watch slot, and
/// the snapshot accessors.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) config: ClientConfig,
    pub(crate) fsm: Arc<TokioMutex<ConnectionFsm>>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) state: Arc<TokioMutex<ChatState>>,
    pub(crate) api: Arc<dyn MessageApi>,
    pub(crate) notices: mpsc::Sender<Notice>,
    pub(crate) out_tx: Arc<TokioMutex<Option<mpsc::Sender<WsMessage>>>>,
    pub(crate) io_tasks: Arc<TokioMutex<Vec<JoinHandle<()>>>>,
    pub(crate) reader_task: Arc<TokioMutex<Option<JoinHandle<()>>>>,
    pub(crate) retry_task: Arc<TokioMutex<Option<JoinHandle<()>>>>,
}

impl ChatClient {
    /// Build a client backed by the real REST collaborator.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<Notice>) {
        let api = Arc::new(RestClient::new(&config.api_url, &config.token));
        Self::with_api(config, api)
    }

    /// Build a client with an injected REST collaborator (used by tests).
    pub fn with_api(
        config: ClientConfig,
        api: Arc<dyn MessageApi>,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (notice_tx, notice_rx) = mpsc::channel(100);
        let client = ChatClient {
            fsm: Arc::new(TokioMutex::new(ConnectionFsm::new(config.reconnect_policy()))),
            dispatcher: Arc::new(EventDispatcher::new()),
            state: Arc::new(TokioMutex::new(ChatState::new(config.user_id))),
            api,
            notices: notice_tx,
            out_tx: Arc::new(TokioMutex::new(None)),
            io_tasks: Arc::new(TokioMutex::new(Vec::new())),
            reader_task: Arc::new(TokioMutex::new(None)),
            retry_task: Arc::new(TokioMutex::new(None)),
            config,
        };
        (client, notice_rx)
    }

    /// Subscribe to the decoded envelope stream.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(handler)
    }

    /// Last-value view of the envelope stream.
    pub fn updates(&self) -> watch::Receiver<Option<Envelope>> {
        self.dispatcher.latest()
    }

    /// Feed one raw inbound frame through dispatch and reconciliation,
    /// exactly as the socket reader does. Public so alternate transports
    /// and tests can drive the client without a live socket.
    pub async fn ingest_frame(&self, raw: &str) {
        if let Some(envelope) = self.dispatcher.ingest(raw) {
            self.apply_envelope(envelope).await;
        }
    }

    /// Apply an envelope to the reconciliation state. Runs on the reader
    /// task, so application order matches transport delivery order.
    async fn apply_envelope(&self, envelope: Envelope) {
        match envelope {
            Envelope::Message { data, .. } => {
                let message = data.message;
                let (appended, from_peer) = {
                    let mut state = self.state.lock().await;
                    state.rooms.apply_message(&message);
                    let from_peer = message.sender.id != self.config.user_id;
                    let appended = state.timeline.apply_message(message);
                    (appended, from_peer)
                };
                if appended && from_peer {
                    self.mark_visible_read().await;
                }
            }
            Envelope::ReadReceipt { data } => {
                let mut state = self.state.lock().await;
                state
                    .rooms
                    .apply_read_marker(data.room_id, data.user_id, data.last_read_message_id);
                state
                    .timeline
                    .apply_read_receipt(data.room_id, data.user_id, data.last_read_message_id);
            }
            Envelope::Typing {
                room_id,
                user_id,
                data,
            } => {
                let mut state = self.state.lock().await;
                state
                    .typing
                    .observe(room_id, user_id, data.is_typing, Instant::now());
            }
            Envelope::Pong => {
                debug!("Heartbeat pong received");
            }
            Envelope::UserStatusChange { data } => {
                let mut state = self.state.lock().await;
                state.rooms.apply_status(data.user_id, data.status);
            }
            Envelope::RoomCreated { data } => {
                info!("Room {} pushed by server", data.room.id);
                let mut state = self.state.lock().await;
                state.rooms.upsert(data.room);
            }
        }
    }

    /// Bootstrap the room list from the REST collaborator.
    pub async fn load_rooms(&self) -> Result<Vec<Room>, ClientError> {
        let rooms = self.api.fetch_rooms().await?;
        let mut state = self.state.lock().await;
        state.rooms.replace_all(rooms.clone());
        Ok(rooms)
    }

    /// Make `room_id` the active conversation and run the initial history
    /// load. Re-activating the already-active room is a no-op.
    pub async fn activate_room(&self, room_id: u64) -> Result<(), ClientError> {
        let ticket = {
            let mut state = self.state.lock().await;
            let ticket = state.timeline.activate(room_id);
            if ticket.is_some() {
                state.rooms.set_active(room_id);
            }
            ticket
        };
        let Some(ticket) = ticket else {
            debug!("Room {} already active; skipping reload", room_id);
            return Ok(());
        };

        match self
            .api
            .fetch_messages(room_id, ticket.page, self.config.page_size)
            .await
        {
            Ok(newest_first) => {
                {
                    let mut state = self.state.lock().await;
                    state
                        .timeline
                        .complete_initial(&ticket, newest_first, self.config.page_size);
                }
                self.mark_visible_read().await;
                Ok(())
            }
            Err(e) => {
                warn!("Initial history load for room {} failed: {}", room_id, e);
                let mut state = self.state.lock().await;
                state.timeline.fail_fetch(&ticket);
                let _ = self.notices.try_send(Notice::FetchFailed { room_id });
                Err(e)
            }
        }
    }

    /// Fetch one more page of history above the loaded window. Returns
    /// `None` when nothing was fetched (no active room, exhausted history,
    /// or a fetch already in flight); otherwise the prepend summary the
    /// caller needs to restore its scroll anchor.
    pub async fn load_older(&self) -> Result<Option<Prepended>, ClientError> {
        let ticket = {
            let mut state = self.state.lock().await;
            state.timeline.begin_older_fetch()
        };
        let Some(ticket) = ticket else {
            return Ok(None);
        };

        match self
            .api
            .fetch_messages(ticket.room_id, ticket.page, self.config.page_size)
            .await
        {
            Ok(newest_first) => {
                let mut state = self.state.lock().await;
                Ok(state
                    .timeline
                    .complete_older(&ticket, newest_first, self.config.page_size))
            }
            Err(e) => {
                warn!(
                    "History page {} for room {} failed: {}",
                    ticket.page, ticket.room_id, e
                );
                let mut state = self.state.lock().await;
                state.timeline.fail_fetch(&ticket);
                let _ = self.notices.try_send(Notice::FetchFailed {
                    room_id: ticket.room_id,
                });
                Err(e)
            }
        }
    }

    /// Report a viewport change for the active room. `at_bottom` controls
    /// whether live appends auto-scroll or accumulate on the badge.
    pub async fn set_viewport(&self, at_bottom: bool) {
        let mut state = self.state.lock().await;
        state.timeline.set_viewport(at_bottom);
    }

    /// The user jumped to the newest message; clears the badge.
    pub async fn jump_to_bottom(&self) {
        let mut state = self.state.lock().await;
        state.timeline.jump_to_bottom();
    }

    /// Best-effort read marking: batch every loaded peer message not yet
    /// read by us to the REST collaborator, then tell peers over the
    /// socket. Failures are logged and swallowed; read state is not
    /// critical-path.
    pub(crate) async fn mark_visible_read(&self) {
        let (ids, newest) = {
            let state = self.state.lock().await;
            let ids = state.timeline.unread_peer_ids();
            let newest = ids.iter().max().copied();
            (ids, newest)
        };
        if ids.is_empty() {
            return;
        }
        match self.api.mark_read(&ids).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.timeline.note_locally_read(&ids);
            }
            Err(e) => {
                debug!("Read marking failed (will retry on next batch): {}", e);
                return;
            }
        }
        if let Some(newest) = newest {
            if let Err(e) = self.send_read_receipt(newest).await {
                debug!("Read receipt for {} not sent: {}", newest, e);
            }
        }
    }

    // ---- snapshot accessors -------------------------------------------

    /// Messages of the active room, ascending by id.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.timeline.messages().to_vec()
    }

    pub async fn active_room(&self) -> Option<u64> {
        self.state.lock().await.timeline.room_id()
    }

    pub async fn has_more_history(&self) -> bool {
        self.state.lock().await.timeline.has_more()
    }

    /// Count on the "new messages" badge (appends that arrived while the
    /// viewport was scrolled up).
    pub async fn unseen_count(&self) -> u32 {
        self.state.lock().await.timeline.unseen()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.state.lock().await.rooms.rooms().to_vec()
    }

    pub async fn unread_count(&self, room_id: u64) -> u32 {
        self.state.lock().await.rooms.unread(room_id)
    }

    /// Users currently typing in `room_id`, stale entries pruned.
    pub async fn typing_in(&self, room_id: u64) -> Vec<u64> {
        self.state
            .lock()
            .await
            .typing
            .typing_in(room_id, Instant::now())
    }

    pub async fn presence(&self, user_id: u64) -> Option<UserStatus> {
        self.state.lock().await.rooms.status(user_id)
    }
}
