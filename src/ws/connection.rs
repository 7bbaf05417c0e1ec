// WebSocket connection management for Colloquy.
// Contains the connection state machine plus connect, disconnect, and
// reconnection handling for ChatClient.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{ChatClient, Notice};
use crate::error::ClientError;
use crate::ws::protocol::OutboundFrame;

/// WebSocket close code for a normal, expected closure. Anything else on an
/// unintentional close triggers the reconnect policy.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Exponential backoff schedule for reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based):
    /// `min(base * 2^attempt, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// What the connection manager must do after a close was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAction {
    /// Schedule a reconnect attempt after the delay.
    Retry { attempt: u32, delay: Duration },
    /// Stay closed until `connect()` is called again.
    Settle,
    /// The close was already accounted for; nothing to do.
    Ignore,
}

/// Pure connection state machine, independent of sockets and timers so the
/// transitions can be driven directly in tests.
///
/// Idle --connect--> Connecting --open--> Open
/// Open --close(intentional or non-retryable)--> Closed (terminal)
/// Open --close(abnormal)--> Connecting (after backoff)
/// Connecting --error--> Closed --retry--> Connecting
#[derive(Debug)]
pub struct ConnectionFsm {
    state: ConnState,
    attempt: u32,
    intentional: bool,
    last_close_code: Option<u16>,
    policy: ReconnectPolicy,
}

impl ConnectionFsm {
    pub fn new(policy: ReconnectPolicy) -> Self {
        ConnectionFsm {
            state: ConnState::Idle,
            attempt: 0,
            intentional: false,
            last_close_code: None,
            policy,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn last_close_code(&self) -> Option<u16> {
        self.last_close_code
    }

    /// A dial was requested. Returns false when a connection is already
    /// open or being established, so rapid re-invocation cannot produce a
    /// second socket.
    pub fn on_connect_requested(&mut self) -> bool {
        match self.state {
            ConnState::Open | ConnState::Connecting => false,
            ConnState::Idle | ConnState::Closed => {
                self.state = ConnState::Connecting;
                self.intentional = false;
                true
            }
        }
    }

    /// The transport reached the open state.
    pub fn on_open(&mut self) {
        self.state = ConnState::Open;
        self.attempt = 0;
    }

    /// The caller asked for a teardown; the next close must not reconnect.
    pub fn on_disconnect_requested(&mut self) {
        self.intentional = true;
    }

    /// The transport closed (or never opened). Decides whether to retry.
    pub fn on_close(&mut self, code: Option<u16>, authenticated: bool) -> ConnAction {
        if matches!(self.state, ConnState::Closed | ConnState::Idle) {
            return ConnAction::Ignore;
        }
        self.state = ConnState::Closed;
        self.last_close_code = code;

        let retryable = !self.intentional && authenticated && code != Some(NORMAL_CLOSURE);
        if retryable {
            let attempt = self.attempt;
            let delay = self.policy.delay(attempt);
            self.attempt += 1;
            ConnAction::Retry { attempt, delay }
        } else {
            ConnAction::Settle
        }
    }

    /// Settle into Closed without a retry, used when credentials are
    /// missing and the dial is never attempted.
    pub fn settle_closed(&mut self) {
        self.state = ConnState::Closed;
    }
}

impl ChatClient {
    /// Open the connection. A no-op when already Open or Connecting; with
    /// absent credentials the manager settles into Closed without retrying.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut fsm = self.fsm.lock().await;
            if !fsm.on_connect_requested() {
                debug!("connect() ignored: connection already open or in progress");
                return Ok(());
            }
        }

        if self.config.token.is_empty() || self.config.user_id == 0 {
            warn!("No session credentials available; staying offline");
            self.fsm.lock().await.settle_closed();
            return Ok(());
        }

        self.dial().await;
        Ok(())
    }

    /// Tear down the connection and suppress any pending or future
    /// reconnect until `connect()` is invoked again.
    pub async fn disconnect(&self) {
        info!("Disconnecting from chat server");
        {
            self.fsm.lock().await.on_disconnect_requested();
        }
        if let Some(retry) = self.retry_task.lock().await.take() {
            retry.abort();
        }
        if let Some(tx) = self.out_tx.lock().await.take() {
            let _ = tx.send(WsMessage::Close(None)).await;
        }
        // Give the writer a chance to flush the close frame before the
        // remaining tasks are torn down.
        tokio::task::yield_now().await;
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        for task in self.io_tasks.lock().await.drain(..) {
            task.abort();
        }

        let action = {
            let mut fsm = self.fsm.lock().await;
            fsm.on_close(Some(NORMAL_CLOSURE), false)
        };
        if action != ConnAction::Ignore {
            let _ = self.notices.try_send(Notice::Disconnected);
        }
    }

    /// Current connection state.
    pub async fn connection_state(&self) -> ConnState {
        self.fsm.lock().await.state()
    }

    /// Submit a frame. Rejected with `NotConnected` unless the connection
    /// is Open; the frame is never queued for later.
    pub(crate) async fn send_frame(&self, frame: OutboundFrame) -> Result<(), ClientError> {
        {
            let fsm = self.fsm.lock().await;
            if fsm.state() != ConnState::Open {
                return Err(ClientError::NotConnected);
            }
        }
        let text = serde_json::to_string(&frame)?;
        let guard = self.out_tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(WsMessage::Text(text))
                .await
                .map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Establish the socket and spawn the reader, writer, and heartbeat
    /// tasks. Called with the state machine already in Connecting. Boxed
    /// because the close handler schedules this again for reconnects.
    fn dial(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.dial_inner())
    }

    async fn dial_inner(&self) {
        let url = format!(
            "{}?user_id={}&token={}",
            self.config.ws_url, self.config.user_id, self.config.token
        );
        info!("Connecting to chat server at {}", self.config.ws_url);

        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                error!("{}", ClientError::ConnectionFailure(e.to_string()));
                self.handle_close(None).await;
                return;
            }
        };

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(64);
        *self.out_tx.lock().await = Some(out_tx.clone());
        {
            self.fsm.lock().await.on_open();
        }
        info!("Connected to chat server");
        let _ = self.notices.try_send(Notice::Connected);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    error!("WebSocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let heartbeat_interval = self.config.heartbeat_interval;
        let heartbeat_tx = out_tx;
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat_interval).await;
                let ping = match serde_json::to_string(&OutboundFrame::Ping) {
                    Ok(text) => text,
                    Err(_) => break,
                };
                if heartbeat_tx.send(WsMessage::Text(ping)).await.is_err() {
                    break;
                }
                debug!("Sent heartbeat ping");
            }
        });

        *self.io_tasks.lock().await = vec![writer, heartbeat];

        let client = self.clone();
        let reader = tokio::spawn(async move {
            let mut close_code: Option<u16> = None;
            while let Some(item) = source.next().await {
                match item {
                    Ok(WsMessage::Text(text)) => client.ingest_frame(&text).await,
                    Ok(WsMessage::Close(frame)) => {
                        close_code = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    Ok(_) => {
                        // Binary and protocol-level ping/pong carry no
                        // chat semantics.
                    }
                    Err(e) => {
                        warn!("WebSocket stream error: {}", e);
                        break;
                    }
                }
            }
            client.handle_close(close_code).await;
        });
        *self.reader_task.lock().await = Some(reader);
    }

    /// React to an observed close: tear down I/O and either schedule a
    /// reconnect or settle, per the state machine's decision.
    async fn handle_close(&self, code: Option<u16>) {
        *self.out_tx.lock().await = None;
        for task in self.io_tasks.lock().await.drain(..) {
            task.abort();
        }

        let action = {
            let mut fsm = self.fsm.lock().await;
            let authenticated = !self.config.token.is_empty();
            fsm.on_close(code, authenticated)
        };

        match action {
            ConnAction::Retry { attempt, delay } => {
                warn!(
                    "{}; reconnecting in {:?} (attempt {})",
                    ClientError::UnexpectedDisconnect { code },
                    delay,
                    attempt
                );
                let _ = self.notices.try_send(Notice::Reconnecting { attempt, delay });
                let client = self.clone();
                let retry = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let proceed = {
                        let mut fsm = client.fsm.lock().await;
                        fsm.on_connect_requested()
                    };
                    if proceed {
                        client.dial().await;
                    }
                });
                *self.retry_task.lock().await = Some(retry);
            }
            ConnAction::Settle => {
                info!("Connection closed (close code {:?})", code);
                let _ = self.notices.try_send(Notice::Disconnected);
            }
            ConnAction::Ignore => {}
        }
    }
}
