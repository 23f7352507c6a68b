use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use shared::{
    domain::{ContentKind, DeliveryStatus},
    protocol::{SendMediaMeta, SendResponse, SendTextRequest},
};
use tracing::{debug, info, warn};

use crate::{
    config::ReconcileStrategy,
    transcript::Promotion,
    types::{LocalMessageId, Message, Payload},
    NoticeLevel, SelectionToken, SyncEngine, SyncError, SyncEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub kind: ContentKind,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
}

impl MediaUpload {
    /// Upload whose kind is implied by its MIME type.
    pub fn from_file_bytes(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let mime_type = mime_type.into();
        Self {
            kind: ContentKind::from_mime(&mime_type),
            file_name: file_name.into(),
            mime_type,
            bytes,
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    Text(String),
    Media(MediaUpload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    pub local_id: LocalMessageId,
    pub status: DeliveryStatus,
    /// `None` when the thread was switched before the send completed.
    pub promotion: Option<Promotion>,
}

struct StagedSend {
    token: SelectionToken,
    local_id: LocalMessageId,
    recipient: String,
    content: OutgoingContent,
}

impl SyncEngine {
    /// Optimistic send: the provisional entry is visible before the network
    /// call starts and is reconciled or flagged when it finishes.
    pub async fn send(self: &Arc<Self>, content: OutgoingContent) -> Result<SendReceipt, SyncError> {
        let staged = self.stage(None, content).await?;
        Ok(self.dispatch(staged).await)
    }

    /// Like [`SyncEngine::send`], but only while the selection captured in
    /// `token` is still current.
    pub(crate) async fn send_for(
        self: &Arc<Self>,
        token: &SelectionToken,
        content: OutgoingContent,
    ) -> Result<SendReceipt, SyncError> {
        let staged = self.stage(Some(token), content).await?;
        Ok(self.dispatch(staged).await)
    }

    /// Sends every upload with its own provisional entry. All entries are
    /// staged up front; the network calls run one after another.
    pub async fn send_batch(
        self: &Arc<Self>,
        uploads: Vec<MediaUpload>,
    ) -> Vec<Result<SendReceipt, SyncError>> {
        let mut staged = Vec::with_capacity(uploads.len());
        for upload in uploads {
            staged.push(self.stage(None, OutgoingContent::Media(upload)).await);
        }

        let mut receipts = Vec::with_capacity(staged.len());
        for entry in staged {
            receipts.push(match entry {
                Ok(entry) => Ok(self.dispatch(entry).await),
                Err(err) => Err(err),
            });
        }
        receipts
    }

    async fn stage(
        &self,
        expected: Option<&SelectionToken>,
        content: OutgoingContent,
    ) -> Result<StagedSend, SyncError> {
        let (kind, payload) = match &content {
            OutgoingContent::Text(text) => {
                if text.trim().is_empty() {
                    return Err(SyncError::EmptyMessage);
                }
                (ContentKind::Text, Payload::Text(text.clone()))
            }
            OutgoingContent::Media(upload) => {
                if upload.bytes.is_empty() {
                    return Err(SyncError::EmptyMessage);
                }
                (
                    upload.kind,
                    Payload::Media {
                        location: upload.file_name.clone(),
                        file_name: Some(upload.file_name.clone()),
                        caption: upload.caption.clone(),
                    },
                )
            }
        };

        let (token, recipient, local_id, len) = {
            let mut guard = self.inner.lock().await;
            if expected.is_some_and(|expected| !guard.is_current(expected)) {
                return Err(SyncError::SelectionChanged);
            }
            let token = guard.token().ok_or(SyncError::NoThreadSelected)?;
            let recipient = guard
                .context()
                .map(|context| context.phone.clone())
                .unwrap_or_default();
            let local_id = guard
                .transcript
                .append_provisional(Message::provisional(kind, payload, Utc::now()))
                .ok_or(SyncError::EmptyMessage)?;
            (token, recipient, local_id, guard.transcript.len())
        };

        debug!(thread_id = %token.thread_id, %local_id, ?kind, "send: provisional entry appended");
        self.emit_transcript_changed(&token.thread_id, len);
        Ok(StagedSend {
            token,
            local_id,
            recipient,
            content,
        })
    }

    async fn dispatch(self: &Arc<Self>, staged: StagedSend) -> SendReceipt {
        let StagedSend {
            token,
            local_id,
            recipient,
            content,
        } = staged;
        let sender = self.settings.sender_identity.clone();

        let outcome = match content {
            OutgoingContent::Text(text) => {
                self.backend
                    .send_text(SendTextRequest {
                        thread_id: token.thread_id.clone(),
                        to: recipient,
                        text,
                        sender,
                    })
                    .await
            }
            OutgoingContent::Media(upload) => {
                let meta = SendMediaMeta {
                    thread_id: token.thread_id.clone(),
                    to: recipient,
                    media_kind: upload.kind,
                    file_name: upload.file_name,
                    mime_type: upload.mime_type,
                    caption: upload.caption,
                    sender,
                };
                self.backend.send_media(meta, upload.bytes).await
            }
        }
        .and_then(|response| {
            if response.success {
                Ok(response)
            } else {
                Err(anyhow!("message store rejected the send"))
            }
        });

        self.complete_send(token, local_id, outcome).await
    }

    async fn complete_send(
        self: &Arc<Self>,
        token: SelectionToken,
        local_id: LocalMessageId,
        outcome: anyhow::Result<SendResponse>,
    ) -> SendReceipt {
        let mut guard = self.inner.lock().await;
        if !guard.is_current(&token) {
            drop(guard);
            debug!(thread_id = %token.thread_id, %local_id, "send: completion after thread switch ignored");
            let status = match outcome {
                Ok(_) => DeliveryStatus::Sent,
                Err(_) => DeliveryStatus::Failed,
            };
            return SendReceipt {
                local_id,
                status,
                promotion: None,
            };
        }

        match outcome {
            Ok(response) => {
                let promotion = match self.settings.reconcile_strategy {
                    ReconcileStrategy::InPlace => guard
                        .transcript
                        .promote(local_id, response.message.map(Message::from_doc)),
                    ReconcileStrategy::Reload => guard.transcript.promote(local_id, None),
                };
                let len = guard.transcript.len();
                drop(guard);

                info!(thread_id = %token.thread_id, %local_id, ?promotion, "send: delivered to message store");
                self.emit_transcript_changed(&token.thread_id, len);
                if self.settings.reconcile_strategy == ReconcileStrategy::Reload {
                    self.schedule_resync().await;
                }
                SendReceipt {
                    local_id,
                    status: DeliveryStatus::Sent,
                    promotion: Some(promotion),
                }
            }
            Err(err) => {
                guard.transcript.mark_failed(local_id);
                let len = guard.transcript.len();
                drop(guard);

                warn!(thread_id = %token.thread_id, %local_id, "send: failed: {err:#}");
                self.emit_transcript_changed(&token.thread_id, len);
                self.emit(SyncEvent::SendFailed {
                    local_id,
                    reason: format!("{err:#}"),
                });
                self.notify(NoticeLevel::Error, "Message could not be sent");
                SendReceipt {
                    local_id,
                    status: DeliveryStatus::Failed,
                    promotion: None,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/send_tests.rs"]
mod tests;
