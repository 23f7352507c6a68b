use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::ContentKind;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    send::{MediaUpload, OutgoingContent, SendReceipt},
    NoticeLevel, SelectionToken, SyncEngine, SyncError, SyncEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub duration: Duration,
}

/// Exclusive hold on the audio input device. Consuming it (either way)
/// releases the device.
#[async_trait]
pub trait AudioCapture: Send {
    async fn finish(self: Box<Self>) -> anyhow::Result<AudioClip>;
    fn discard(self: Box<Self>);
}

#[async_trait]
pub trait AudioInput: Send + Sync {
    async fn acquire(&self) -> anyhow::Result<Box<dyn AudioCapture>>;
}

pub struct MissingAudioInput;

#[async_trait]
impl AudioInput for MissingAudioInput {
    async fn acquire(&self) -> anyhow::Result<Box<dyn AudioCapture>> {
        Err(anyhow!("no audio input device is configured"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Starting,
    Recording { started_at: DateTime<Utc> },
    Sending,
}

pub(crate) enum RecordingSlot {
    Idle,
    Acquiring {
        token: SelectionToken,
        /// Distinguishes start attempts within one selection.
        attempt: u64,
    },
    Recording {
        token: SelectionToken,
        started_at: DateTime<Utc>,
        started: Instant,
        capture: Box<dyn AudioCapture>,
    },
    Sending {
        token: SelectionToken,
    },
}

impl RecordingSlot {
    pub(crate) fn state(&self) -> RecordingState {
        match self {
            Self::Idle => RecordingState::Idle,
            Self::Acquiring { .. } => RecordingState::Starting,
            Self::Recording { started_at, .. } => RecordingState::Recording {
                started_at: *started_at,
            },
            Self::Sending { .. } => RecordingState::Sending,
        }
    }

    /// Resets to idle, handing back the capture of an active recording.
    pub(crate) fn take_for_cancel(&mut self) -> Option<Box<dyn AudioCapture>> {
        match std::mem::replace(self, Self::Idle) {
            Self::Recording { capture, .. } => Some(capture),
            _ => None,
        }
    }
}

fn voice_note_name(mime_type: &str, at: DateTime<Utc>) -> String {
    let extension = mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.split('/').nth(1))
        .map(str::trim)
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or("webm");
    format!("voice-{}.{extension}", at.format("%Y%m%d-%H%M%S"))
}

impl SyncEngine {
    pub async fn recording_state(&self) -> RecordingState {
        self.inner.lock().await.recording.state()
    }

    /// Time since recording started, for the duration tick.
    pub async fn recording_elapsed(&self) -> Option<Duration> {
        match &self.inner.lock().await.recording {
            RecordingSlot::Recording { started, .. } => Some(started.elapsed()),
            _ => None,
        }
    }

    pub async fn start_recording(&self) -> Result<(), SyncError> {
        let (token, attempt) = {
            let mut guard = self.inner.lock().await;
            let token = guard.token().ok_or(SyncError::NoThreadSelected)?;
            if !matches!(guard.recording, RecordingSlot::Idle) {
                debug!(thread_id = %token.thread_id, "recording: already active");
                return Err(SyncError::GuardRejected("recording"));
            }
            guard.recording_attempts += 1;
            let attempt = guard.recording_attempts;
            guard.recording = RecordingSlot::Acquiring {
                token: token.clone(),
                attempt,
            };
            (token, attempt)
        };
        self.emit(SyncEvent::Recording(RecordingState::Starting));

        let acquired = self.audio.acquire().await;

        let mut guard = self.inner.lock().await;
        let owns_slot = guard.is_current(&token)
            && matches!(
                &guard.recording,
                RecordingSlot::Acquiring { token: pending, attempt: current }
                    if *pending == token && *current == attempt
            );
        match acquired {
            Ok(capture) if owns_slot => {
                let started_at = Utc::now();
                guard.recording = RecordingSlot::Recording {
                    token: token.clone(),
                    started_at,
                    started: Instant::now(),
                    capture,
                };
                drop(guard);
                info!(thread_id = %token.thread_id, "recording: started");
                self.emit(SyncEvent::Recording(RecordingState::Recording { started_at }));
                Ok(())
            }
            Ok(capture) => {
                drop(guard);
                capture.discard();
                debug!(thread_id = %token.thread_id, attempt, "recording: stale device grant released");
                Err(SyncError::NotRecording)
            }
            Err(err) => {
                if owns_slot {
                    guard.recording = RecordingSlot::Idle;
                }
                drop(guard);
                warn!(thread_id = %token.thread_id, "recording: audio input unavailable: {err:#}");
                self.emit(SyncEvent::Recording(RecordingState::Idle));
                self.notify(NoticeLevel::Error, "Microphone is not available");
                Err(SyncError::AudioUnavailable(err))
            }
        }
    }

    /// Finalizes the recording and sends it as an audio message.
    pub async fn stop_recording(self: &Arc<Self>) -> Result<SendReceipt, SyncError> {
        let (token, capture) = {
            let mut guard = self.inner.lock().await;
            match std::mem::replace(&mut guard.recording, RecordingSlot::Idle) {
                RecordingSlot::Recording { token, capture, .. } => {
                    guard.recording = RecordingSlot::Sending {
                        token: token.clone(),
                    };
                    (token, capture)
                }
                other => {
                    guard.recording = other;
                    return Err(SyncError::NotRecording);
                }
            }
        };
        self.emit(SyncEvent::Recording(RecordingState::Sending));

        let result = match capture.finish().await {
            Ok(clip) => {
                debug!(
                    thread_id = %token.thread_id,
                    bytes = clip.bytes.len(),
                    duration_ms = clip.duration.as_millis() as u64,
                    "recording: clip finalized"
                );
                let upload = MediaUpload {
                    kind: ContentKind::Audio,
                    file_name: voice_note_name(&clip.mime_type, Utc::now()),
                    mime_type: clip.mime_type,
                    bytes: clip.bytes,
                    caption: None,
                };
                let sent = self.send_for(&token, OutgoingContent::Media(upload)).await;
                if matches!(sent, Err(SyncError::SelectionChanged)) {
                    debug!(thread_id = %token.thread_id, "recording: clip dropped after thread switch");
                }
                sent
            }
            Err(err) => {
                warn!(thread_id = %token.thread_id, "recording: capture failed: {err:#}");
                self.notify(NoticeLevel::Error, "Voice message could not be recorded");
                Err(SyncError::AudioUnavailable(err))
            }
        };

        let mut guard = self.inner.lock().await;
        if matches!(&guard.recording, RecordingSlot::Sending { token: sending } if *sending == token) {
            guard.recording = RecordingSlot::Idle;
            drop(guard);
            self.emit(SyncEvent::Recording(RecordingState::Idle));
        }
        result
    }

    /// Discards the captured audio without sending. Returns whether a
    /// recording was active.
    pub async fn cancel_recording(&self) -> bool {
        let capture = {
            let mut guard = self.inner.lock().await;
            match guard.recording.state() {
                RecordingState::Recording { .. } => guard.recording.take_for_cancel(),
                // The device is released as soon as the pending acquire resolves.
                RecordingState::Starting => {
                    guard.recording = RecordingSlot::Idle;
                    None
                }
                RecordingState::Idle | RecordingState::Sending => return false,
            }
        };
        if let Some(capture) = capture {
            capture.discard();
        }
        info!("recording: cancelled");
        self.emit(SyncEvent::Recording(RecordingState::Idle));
        true
    }
}

#[cfg(test)]
#[path = "tests/recording_tests.rs"]
mod tests;
