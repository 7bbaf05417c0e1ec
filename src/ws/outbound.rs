// Outbound frame composition.
// Builds well-formed send/typing/read-receipt frames and hands them to the
// connection manager. Fire-and-forget: a sent message shows up in the
// conversation only once the server echoes it back, so there is no
// optimistic local insert here.

use log::{debug, warn};

use super::protocol::{OutboundFrame, TypingPayload};
use super::{ChatClient, Notice};
use crate::error::ClientError;
use crate::models::{FileMeta, MessageKind};

impl ChatClient {
    /// Send a chat message to `room_id`. The recipient list is filled from
    /// the room's member roster so the server can route the broadcast.
    ///
    /// The only surfaced failure is `NotConnected`; the frame is dropped,
    /// not queued, and the user is told to resend once reconnected.
    pub async fn send_chat_message(
        &self,
        room_id: u64,
        content: &str,
        kind: MessageKind,
        file: Option<FileMeta>,
    ) -> Result<(), ClientError> {
        let (recipients, mentions) = {
            let state = self.state.lock().await;
            (state.rooms.member_ids(room_id), Vec::new())
        };

        let (file_url, file_name, file_size) = match file {
            Some(meta) => (Some(meta.url), Some(meta.name), Some(meta.size)),
            None => (None, None, None),
        };

        let frame = OutboundFrame::Message {
            room_id,
            content: content.to_string(),
            message_type: kind,
            mentions,
            recipients,
            file_url,
            file_name,
            file_size,
        };

        match self.send_frame(frame).await {
            Ok(()) => {
                debug!("Message submitted to room {}", room_id);
                Ok(())
            }
            Err(e) => {
                warn!("Message to room {} not sent: {}", room_id, e);
                let _ = self.notices.try_send(Notice::SendFailed);
                Err(e)
            }
        }
    }

    /// Broadcast a typing indicator for `room_id`.
    pub async fn send_typing(&self, room_id: u64, is_typing: bool) -> Result<(), ClientError> {
        self.send_frame(OutboundFrame::Typing {
            room_id,
            data: TypingPayload { is_typing },
        })
        .await
    }

    /// Tell peers we have read up to and including `message_id`.
    pub async fn send_read_receipt(&self, message_id: u64) -> Result<(), ClientError> {
        self.send_frame(OutboundFrame::ReadReceipt { message_id }).await
    }
}
