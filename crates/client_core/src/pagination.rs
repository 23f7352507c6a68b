//! Paged history loading with a scroll anchor kept across prepends.
//!
//! Older pages are prepended above what the user is reading. Before the
//! prepend the viewport's offset and content height are captured; once layout
//! settles the offset becomes `previous_offset + (new_height - previous_height)`
//! so the previously visible messages stay put no matter how many rows were
//! inserted above them.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use shared::{
    domain::ThreadId,
    protocol::{MessageDoc, SortDirection},
};
use tracing::{debug, info, warn};

use crate::{types::MessageRef, NoticeLevel, SelectionToken, SyncEngine, SyncError, SyncEvent};

/// Offset at which the load-more request is actually issued.
const TOP_OF_SCROLL_PX: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportMetrics {
    pub scroll_offset_px: f64,
    pub content_height_px: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollAnchor {
    /// Oldest loaded message when the anchor was armed.
    pub reference: Option<MessageRef>,
    pub offset_px: f64,
    pub content_height_px: f64,
}

/// Rendering surface the transcript is shown in.
#[async_trait]
pub trait ViewportAnchor: Send + Sync {
    fn metrics(&self) -> ViewportMetrics;
    /// Resolves once the surface has laid out `message_count` rows.
    async fn settle(&self, message_count: usize) -> anyhow::Result<ViewportMetrics>;
    fn scroll_to(&self, offset_px: f64);
}

/// Viewport for hosts without a rendering surface (tests, the console driver).
pub struct DetachedViewport;

#[async_trait]
impl ViewportAnchor for DetachedViewport {
    fn metrics(&self) -> ViewportMetrics {
        ViewportMetrics::default()
    }

    async fn settle(&self, _message_count: usize) -> anyhow::Result<ViewportMetrics> {
        Ok(ViewportMetrics::default())
    }

    fn scroll_to(&self, _offset_px: f64) {}
}

pub fn capture_anchor(reference: Option<MessageRef>, metrics: ViewportMetrics) -> ScrollAnchor {
    ScrollAnchor {
        reference,
        offset_px: metrics.scroll_offset_px,
        content_height_px: metrics.content_height_px,
    }
}

pub fn restored_offset(anchor: &ScrollAnchor, new_content_height_px: f64) -> f64 {
    anchor.offset_px + (new_content_height_px - anchor.content_height_px)
}

/// Scrolls `viewport` so the anchored content stays fixed once the content
/// height became `new_content_height_px`. Returns the offset scrolled to.
pub fn restore_anchor(
    viewport: &dyn ViewportAnchor,
    anchor: &ScrollAnchor,
    new_content_height_px: f64,
) -> f64 {
    let target = restored_offset(anchor, new_content_height_px).max(0.0);
    viewport.scroll_to(target);
    target
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    Ignored,
    AnchorArmed,
    Loaded { added: usize },
    Busy,
    Exhausted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoad {
    Replaced { count: usize },
    Prepended { added: usize },
    /// No older history remains.
    Exhausted,
    /// The selection or load sequence changed while the fetch was in flight.
    Stale,
    /// Initial load failed; the transcript fell back to local content.
    Degraded,
}

#[derive(Debug)]
pub(crate) struct PaginationState {
    pub(crate) page: u32,
    pub(crate) load_more_in_flight: bool,
    pub(crate) initial_in_flight: bool,
    pub(crate) anchor: Option<ScrollAnchor>,
    pub(crate) exhausted: bool,
    pub(crate) loaded_once: bool,
    reset_seq: u64,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            page: 1,
            load_more_in_flight: false,
            initial_in_flight: false,
            anchor: None,
            exhausted: false,
            loaded_once: false,
            reset_seq: 0,
        }
    }
}

impl PaginationState {
    pub(crate) fn reset(&mut self) {
        let reset_seq = self.reset_seq + 1;
        *self = Self {
            reset_seq,
            ..Self::default()
        };
    }

    fn is_busy(&self) -> bool {
        self.load_more_in_flight || self.initial_in_flight
    }
}

impl SyncEngine {
    pub async fn is_loading_more(&self) -> bool {
        self.inner.lock().await.pagination.load_more_in_flight
    }

    /// Scroll listener. Arms the anchor near the top and issues a load-more
    /// only at the very top while nothing else is loading.
    pub async fn on_scroll(self: &Arc<Self>, offset_px: f64) -> ScrollOutcome {
        let (thread_id, next_page) = {
            let mut guard = self.inner.lock().await;
            let Some(token) = guard.token() else {
                return ScrollOutcome::Ignored;
            };

            let mut armed = false;
            if offset_px <= self.settings.load_more_threshold_px && guard.pagination.anchor.is_none() {
                let reference = guard.transcript.oldest().map(|message| message.id.clone());
                guard.pagination.anchor = Some(capture_anchor(reference, self.viewport.metrics()));
                armed = true;
            }

            if offset_px > TOP_OF_SCROLL_PX {
                return if armed {
                    ScrollOutcome::AnchorArmed
                } else {
                    ScrollOutcome::Ignored
                };
            }
            if guard.pagination.exhausted {
                return ScrollOutcome::Exhausted;
            }
            if guard.pagination.is_busy() {
                debug!(thread_id = %token.thread_id, "pagination: load already in flight");
                return ScrollOutcome::Busy;
            }
            (token.thread_id, guard.pagination.page + 1)
        };

        match self.load_page(&thread_id, next_page, false).await {
            Ok(PageLoad::Prepended { added }) => ScrollOutcome::Loaded { added },
            Ok(PageLoad::Exhausted) => ScrollOutcome::Exhausted,
            Ok(_) => ScrollOutcome::Ignored,
            Err(SyncError::GuardRejected(_)) => ScrollOutcome::Busy,
            Err(_) => ScrollOutcome::Failed,
        }
    }

    /// Loads `page` (1-based, newest first on the wire) of the selected
    /// thread. An initial load replaces the transcript; otherwise the page is
    /// prepended with the scroll anchor preserved.
    pub async fn load_page(
        self: &Arc<Self>,
        thread_id: &ThreadId,
        page: u32,
        is_initial: bool,
    ) -> Result<PageLoad, SyncError> {
        let page = page.max(1);
        let (token, reset_seq) = {
            let mut guard = self.inner.lock().await;
            let token = guard.token().ok_or(SyncError::NoThreadSelected)?;
            if token.thread_id != *thread_id {
                return Err(SyncError::ThreadMismatch {
                    expected: token.thread_id,
                    actual: thread_id.clone(),
                });
            }

            let pagination = &mut guard.pagination;
            if is_initial {
                pagination.reset_seq += 1;
                pagination.initial_in_flight = true;
                pagination.load_more_in_flight = false;
            } else {
                if pagination.is_busy() {
                    return Err(SyncError::GuardRejected("load-more"));
                }
                if pagination.exhausted {
                    return Ok(PageLoad::Exhausted);
                }
                pagination.load_more_in_flight = true;
            }
            (token, pagination.reset_seq)
        };
        if !is_initial {
            self.emit(SyncEvent::LoadingMore(true));
        }

        debug!(thread_id = %thread_id, page, is_initial, "pagination: fetching page");
        let fetched = self
            .backend
            .fetch_message_page(thread_id, page, self.settings.page_size, SortDirection::Desc)
            .await
            .and_then(|response| {
                if response.status {
                    Ok(response.docs)
                } else {
                    Err(anyhow!("message store reported an unsuccessful page fetch"))
                }
            });

        if is_initial {
            self.finish_initial_load(token, reset_seq, page, fetched).await
        } else {
            self.finish_load_more(token, reset_seq, page, fetched).await
        }
    }

    async fn finish_initial_load(
        &self,
        token: SelectionToken,
        reset_seq: u64,
        page: u32,
        fetched: anyhow::Result<Vec<MessageDoc>>,
    ) -> Result<PageLoad, SyncError> {
        let mut guard = self.inner.lock().await;
        if !guard.is_current(&token) || guard.pagination.reset_seq != reset_seq {
            debug!(thread_id = %token.thread_id, "pagination: discarding superseded initial load");
            return Ok(PageLoad::Stale);
        }
        guard.pagination.initial_in_flight = false;

        match fetched {
            Ok(docs) => {
                let short_page = docs.len() < self.settings.page_size as usize;
                let summary = guard
                    .transcript
                    .replace_with_canonical(docs, self.settings.reconcile_window);
                let pagination = &mut guard.pagination;
                pagination.page = page;
                pagination.anchor = None;
                pagination.exhausted = short_page;
                pagination.loaded_once = true;
                let len = guard.transcript.len();
                drop(guard);

                info!(
                    thread_id = %token.thread_id,
                    canonical = summary.canonical,
                    provisional_kept = summary.provisional_kept,
                    superseded = summary.superseded,
                    "pagination: transcript replaced"
                );
                self.emit_transcript_changed(&token.thread_id, len);
                Ok(PageLoad::Replaced {
                    count: summary.canonical,
                })
            }
            Err(err) => {
                if !guard.pagination.loaded_once {
                    guard.transcript.retain_provisional();
                }
                let len = guard.transcript.len();
                drop(guard);

                warn!(thread_id = %token.thread_id, "pagination: initial load failed, showing local transcript: {err:#}");
                self.emit_transcript_changed(&token.thread_id, len);
                self.notify(NoticeLevel::Warning, "Could not load messages for this chat");
                Ok(PageLoad::Degraded)
            }
        }
    }

    async fn finish_load_more(
        &self,
        token: SelectionToken,
        reset_seq: u64,
        page: u32,
        fetched: anyhow::Result<Vec<MessageDoc>>,
    ) -> Result<PageLoad, SyncError> {
        let mut guard = self.inner.lock().await;
        if !guard.is_current(&token) || guard.pagination.reset_seq != reset_seq {
            debug!(thread_id = %token.thread_id, page, "pagination: discarding load-more after reset");
            drop(guard);
            self.emit(SyncEvent::LoadingMore(false));
            return Ok(PageLoad::Stale);
        }

        let docs = match fetched {
            Ok(docs) => docs,
            Err(err) => {
                guard.pagination.load_more_in_flight = false;
                drop(guard);
                warn!(thread_id = %token.thread_id, page, "pagination: load-more failed: {err:#}");
                self.emit(SyncEvent::LoadingMore(false));
                return Err(SyncError::network("load older messages", err));
            }
        };

        if docs.is_empty() {
            let pagination = &mut guard.pagination;
            pagination.load_more_in_flight = false;
            pagination.exhausted = true;
            pagination.anchor = None;
            drop(guard);
            debug!(thread_id = %token.thread_id, page, "pagination: history exhausted");
            self.emit(SyncEvent::LoadingMore(false));
            return Ok(PageLoad::Exhausted);
        }

        let short_page = docs.len() < self.settings.page_size as usize;
        let reference = guard.transcript.oldest().map(|message| message.id.clone());
        let mut anchor = guard
            .pagination
            .anchor
            .take()
            .unwrap_or_else(|| capture_anchor(reference, self.viewport.metrics()));
        let before = self.viewport.metrics();
        anchor.offset_px = before.scroll_offset_px;
        anchor.content_height_px = before.content_height_px;

        let added = guard.transcript.prepend_older(docs);
        guard.pagination.page = page;
        guard.pagination.exhausted = short_page;
        let len = guard.transcript.len();
        drop(guard);
        self.emit_transcript_changed(&token.thread_id, len);

        match self.viewport.settle(len).await {
            Ok(after) => {
                restore_anchor(self.viewport.as_ref(), &anchor, after.content_height_px);
            }
            Err(err) => {
                warn!(thread_id = %token.thread_id, "pagination: layout did not settle, scroll position kept: {err:#}");
            }
        }

        {
            let mut guard = self.inner.lock().await;
            if guard.is_current(&token) && guard.pagination.reset_seq == reset_seq {
                guard.pagination.load_more_in_flight = false;
            }
        }
        info!(thread_id = %token.thread_id, page, added, "pagination: older page prepended");
        self.emit(SyncEvent::LoadingMore(false));
        Ok(PageLoad::Prepended { added })
    }
}

#[cfg(test)]
#[path = "tests/pagination_tests.rs"]
mod tests;
