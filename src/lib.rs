// Re-export needed modules for testing
pub mod api;
pub mod credentials;
pub mod error;
pub mod models;
pub mod sync;  // Conversation reconciliation
pub mod ws;  // WebSocket synchronization client

// Re-export main types for convenience
pub use error::ClientError;
pub use models::*;
pub use ws::{ChatClient, ClientConfig, ConnState, Notice};
