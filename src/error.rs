use thiserror::Error;

/// Failure taxonomy for the synchronization client.
///
/// Connection-level failures are recovered automatically by the reconnect
/// policy and only surface as transient notices; `NotConnected` is the one
/// error callers are expected to handle directly.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport never reached the open state.
    #[error("failed to establish connection: {0}")]
    ConnectionFailure(String),

    /// The transport closed without an intentional teardown.
    #[error("connection closed unexpectedly (close code {code:?})")]
    UnexpectedDisconnect { code: Option<u16> },

    /// A frame was submitted while the connection was not open. The frame
    /// is dropped, never queued.
    #[error("not connected to the chat server")]
    NotConnected,

    /// A REST call (history page, read marking, room list) failed.
    #[error("chat API request failed: {0}")]
    Fetch(String),

    /// A frame could not be encoded or decoded.
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),
}
