use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::{debounce::DebounceSlot, types::Message, NoticeLevel, SelectionToken, SyncEngine, SyncEvent};

/// What the search surface renders. Independent of the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchView {
    pub query: String,
    pub loading: bool,
    /// Oldest first.
    pub results: Vec<Message>,
    /// A completed search found nothing ("no messages found").
    pub no_matches: bool,
}

#[derive(Debug)]
pub(crate) struct SearchState {
    pub(crate) view: SearchView,
    pub(crate) timer: DebounceSlot,
    pub(crate) seq: u64,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            view: SearchView::default(),
            timer: DebounceSlot::new("search"),
            seq: 0,
        }
    }
}

impl SearchState {
    /// Clears the view and invalidates any scheduled or in-flight query.
    pub(crate) fn reset(&mut self) {
        self.timer.cancel();
        self.seq += 1;
        self.view = SearchView::default();
    }
}

impl SyncEngine {
    /// Keystroke entry point. Only the text that is still current once the
    /// debounce settles is searched.
    pub async fn query(self: &Arc<Self>, text: &str) {
        let mut guard = self.inner.lock().await;
        let Some(token) = guard.token() else {
            return;
        };

        if text.trim().is_empty() {
            let was_loading = guard.search.view.loading;
            guard.search.reset();
            drop(guard);
            if was_loading {
                self.emit(SyncEvent::Searching(false));
            }
            return;
        }

        let search = &mut guard.search;
        search.seq += 1;
        search.view.query = text.to_string();
        let seq = search.seq;
        let query = text.trim().to_string();
        let engine = Arc::downgrade(self);
        search.timer.schedule(self.settings.search_debounce, async move {
            if let Some(engine) = engine.upgrade() {
                engine.run_search(token, seq, query).await;
            }
        });
    }

    async fn run_search(self: Arc<Self>, token: SelectionToken, seq: u64, query: String) {
        {
            let mut guard = self.inner.lock().await;
            if !guard.is_current(&token) || guard.search.seq != seq {
                return;
            }
            guard.search.view.loading = true;
        }
        self.emit(SyncEvent::Searching(true));
        debug!(thread_id = %token.thread_id, %query, "search: querying thread");

        let fetched = self
            .backend
            .search_messages(&token.thread_id, &query)
            .await
            .and_then(|page| {
                if page.status {
                    Ok(page.docs)
                } else {
                    Err(anyhow!("message store reported an unsuccessful search"))
                }
            });

        let mut guard = self.inner.lock().await;
        if !guard.is_current(&token) || guard.search.seq != seq {
            debug!(thread_id = %token.thread_id, %query, "search: stale response dropped");
            return;
        }
        let view = &mut guard.search.view;
        view.loading = false;
        let failed = match fetched {
            Ok(docs) => {
                view.results = docs.into_iter().rev().map(Message::from_doc).collect();
                view.no_matches = view.results.is_empty();
                None
            }
            Err(err) => {
                view.results.clear();
                view.no_matches = false;
                Some(err)
            }
        };
        let count = view.results.len();
        drop(guard);

        self.emit(SyncEvent::Searching(false));
        match failed {
            None => {
                info!(thread_id = %token.thread_id, %query, count, "search: results updated");
                self.emit(SyncEvent::SearchResults {
                    thread_id: token.thread_id,
                    count,
                });
            }
            Some(err) => {
                warn!(thread_id = %token.thread_id, %query, "search: failed: {err:#}");
                self.notify(NoticeLevel::Warning, "Search failed");
            }
        }
    }

    /// Closes the search surface; a response still in flight is discarded.
    pub async fn close_search(&self) {
        let was_loading = {
            let mut guard = self.inner.lock().await;
            let was_loading = guard.search.view.loading;
            guard.search.reset();
            was_loading
        };
        if was_loading {
            self.emit(SyncEvent::Searching(false));
        }
    }

    pub async fn search_view(&self) -> SearchView {
        self.inner.lock().await.search.view.clone()
    }

    pub async fn is_searching(&self) -> bool {
        self.inner.lock().await.search.view.loading
    }
}

#[cfg(test)]
#[path = "tests/search_tests.rs"]
mod tests;
