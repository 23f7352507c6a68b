use std::sync::Arc;

use shared::domain::ThreadId;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

pub mod config;
pub mod debounce;
pub mod error;
pub mod pagination;
pub mod push;
pub mod realtime;
pub mod recording;
pub mod search;
pub mod send;
pub mod transcript;
pub mod transport;
pub mod types;

pub use config::{load_settings, load_settings_from, ReconcileStrategy, SyncSettings};
pub use error::SyncError;
pub use pagination::{
    DetachedViewport, PageLoad, ScrollAnchor, ScrollOutcome, ViewportAnchor, ViewportMetrics,
};
pub use realtime::{DropReason, MatchDecision};
pub use recording::{AudioCapture, AudioClip, AudioInput, MissingAudioInput, RecordingState};
pub use search::SearchView;
pub use send::{MediaUpload, OutgoingContent, SendReceipt};
pub use transcript::{Promotion, TranscriptStore};
pub use transport::{HttpMessageBackend, MessageBackend, MissingMessageBackend};
pub use types::{LocalMessageId, Message, MessageRef, Payload};

use debounce::DebounceSlot;
use pagination::PaginationState;
use recording::RecordingSlot;
use search::SearchState;

/// The conversation the user has open. Display metadata is owned by the
/// contact directory; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContext {
    pub thread_id: ThreadId,
    pub phone: String,
    pub display_name: Option<String>,
}

impl ThreadContext {
    pub fn new(thread_id: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            thread_id: ThreadId::new(thread_id),
            phone: phone.into(),
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Non-blocking notification meant for a toast or status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    TranscriptChanged {
        thread_id: ThreadId,
        len: usize,
    },
    LoadingMore(bool),
    Searching(bool),
    SearchResults {
        thread_id: ThreadId,
        count: usize,
    },
    SendFailed {
        local_id: LocalMessageId,
        reason: String,
    },
    Recording(RecordingState),
    Connectivity(bool),
    Notice(Notice),
}

/// Captured at the start of an asynchronous operation; its completion only
/// applies while the same selection is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectionToken {
    pub(crate) thread_id: ThreadId,
    pub(crate) epoch: u64,
}

pub(crate) struct Selection {
    pub(crate) context: ThreadContext,
    pub(crate) epoch: u64,
}

pub(crate) struct EngineState {
    pub(crate) selection: Option<Selection>,
    next_epoch: u64,
    pub(crate) transcript: TranscriptStore,
    pub(crate) pagination: PaginationState,
    pub(crate) resync_timer: DebounceSlot,
    pub(crate) search: SearchState,
    pub(crate) recording: RecordingSlot,
    pub(crate) recording_attempts: u64,
    pub(crate) connected: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            selection: None,
            next_epoch: 0,
            transcript: TranscriptStore::new(),
            pagination: PaginationState::default(),
            resync_timer: DebounceSlot::new("resync"),
            search: SearchState::default(),
            recording: RecordingSlot::Idle,
            recording_attempts: 0,
            connected: false,
        }
    }

    pub(crate) fn token(&self) -> Option<SelectionToken> {
        self.selection.as_ref().map(|selection| SelectionToken {
            thread_id: selection.context.thread_id.clone(),
            epoch: selection.epoch,
        })
    }

    pub(crate) fn is_current(&self, token: &SelectionToken) -> bool {
        self.selection
            .as_ref()
            .is_some_and(|selection| selection.epoch == token.epoch)
    }

    pub(crate) fn context(&self) -> Option<&ThreadContext> {
        self.selection.as_ref().map(|selection| &selection.context)
    }

    /// Drops everything scoped to the previous selection and returns the
    /// capture of an active recording, which the caller must discard.
    fn reset_for(&mut self, selection: Option<ThreadContext>) -> Option<Box<dyn AudioCapture>> {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.selection = selection.map(|context| Selection { context, epoch });
        self.transcript.clear();
        self.pagination.reset();
        self.resync_timer.cancel();
        self.search.reset();
        self.recording.take_for_cancel()
    }
}

pub struct SyncEngine {
    settings: SyncSettings,
    backend: Arc<dyn MessageBackend>,
    viewport: Arc<dyn ViewportAnchor>,
    audio: Arc<dyn AudioInput>,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings, backend: Arc<dyn MessageBackend>) -> Arc<Self> {
        Self::new_with_dependencies(
            settings,
            backend,
            Arc::new(DetachedViewport),
            Arc::new(MissingAudioInput),
        )
    }

    pub fn new_with_dependencies(
        settings: SyncSettings,
        backend: Arc<dyn MessageBackend>,
        viewport: Arc<dyn ViewportAnchor>,
        audio: Arc<dyn AudioInput>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Arc::new(Self {
            settings,
            backend,
            viewport,
            audio,
            inner: Mutex::new(EngineState::new()),
            events,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Opens `context`, invalidating timers, in-flight pagination, search and
    /// recording of the previous thread, then performs the initial load.
    pub async fn select_thread(self: &Arc<Self>, context: ThreadContext) -> Result<PageLoad, SyncError> {
        let thread_id = context.thread_id.clone();
        let discarded = {
            let mut guard = self.inner.lock().await;
            guard.reset_for(Some(context))
        };
        if let Some(capture) = discarded {
            capture.discard();
            self.emit(SyncEvent::Recording(RecordingState::Idle));
        }
        info!(thread_id = %thread_id, "thread: selected");
        self.emit(SyncEvent::TranscriptChanged {
            thread_id: thread_id.clone(),
            len: 0,
        });

        self.load_page(&thread_id, 1, true).await
    }

    pub async fn close_thread(&self) {
        let discarded = {
            let mut guard = self.inner.lock().await;
            if guard.selection.is_none() {
                return;
            }
            guard.reset_for(None)
        };
        if let Some(capture) = discarded {
            capture.discard();
            self.emit(SyncEvent::Recording(RecordingState::Idle));
        }
        debug!("thread: closed");
    }

    pub async fn selected_thread(&self) -> Option<ThreadContext> {
        self.inner.lock().await.context().cloned()
    }

    /// Ordered snapshot of the open thread's transcript, oldest first.
    pub async fn transcript(&self) -> Vec<Message> {
        self.inner.lock().await.transcript.snapshot()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn notify(&self, level: NoticeLevel, text: impl Into<String>) {
        self.emit(SyncEvent::Notice(Notice {
            level,
            text: text.into(),
        }));
    }

    pub(crate) fn emit_transcript_changed(&self, thread_id: &ThreadId, len: usize) {
        self.emit(SyncEvent::TranscriptChanged {
            thread_id: thread_id.clone(),
            len,
        });
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
