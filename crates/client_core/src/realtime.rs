use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use shared::{
    domain::ThreadId,
    protocol::{PushEvent, PushEventKind},
};
use tracing::{debug, info};

use crate::{SelectionToken, SyncEngine, SyncError, SyncEvent, ThreadContext};

static PHONE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{10,}").expect("phone token regex"));

const COUNTRY_PREFIX: &str = "91";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoOpenThread,
    NoPhoneToken,
    PhoneMismatch,
    OtherThread,
    Unrelated,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    Resync(ThreadId),
    Drop(DropReason),
}

/// First run of ten or more consecutive ASCII digits in `content`.
pub fn extract_phone_token(content: &str) -> Option<&str> {
    PHONE_TOKEN.find(content).map(|found| found.as_str())
}

/// Strips formatting characters and a leading `91` country prefix.
pub fn normalize_phone(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '+'))
        .collect();
    match stripped.strip_prefix(COUNTRY_PREFIX) {
        Some(rest) => rest.to_string(),
        None => stripped,
    }
}

/// Substring match in either direction after normalization. An empty side
/// never matches.
pub fn phones_match(a: &str, b: &str) -> bool {
    let a = normalize_phone(a);
    let b = normalize_phone(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

pub fn classify_event(event: &PushEvent, open: Option<&ThreadContext>) -> MatchDecision {
    if event.kind == PushEventKind::Broadcast {
        return MatchDecision::Drop(DropReason::Unrelated);
    }
    let Some(open) = open else {
        return MatchDecision::Drop(DropReason::NoOpenThread);
    };

    if let Some(thread_id) = &event.thread_id {
        return if *thread_id == open.thread_id {
            MatchDecision::Resync(open.thread_id.clone())
        } else {
            MatchDecision::Drop(DropReason::OtherThread)
        };
    }

    if event.kind != PushEventKind::NewMessage {
        return MatchDecision::Drop(DropReason::Unrelated);
    }
    let Some(token) = event.content.as_deref().and_then(extract_phone_token) else {
        return MatchDecision::Drop(DropReason::NoPhoneToken);
    };
    if phones_match(token, &open.phone) {
        MatchDecision::Resync(open.thread_id.clone())
    } else {
        MatchDecision::Drop(DropReason::PhoneMismatch)
    }
}

impl SyncEngine {
    /// Routes a push notification. A match only schedules a resync; the
    /// payload itself never touches the transcript.
    pub async fn on_event(self: &Arc<Self>, event: PushEvent) -> MatchDecision {
        let decision = {
            let guard = self.inner.lock().await;
            classify_event(&event, guard.context())
        };
        match &decision {
            MatchDecision::Resync(thread_id) => {
                debug!(thread_id = %thread_id, kind = ?event.kind, "realtime: event matched open thread");
                self.schedule_resync().await;
            }
            MatchDecision::Drop(reason) => {
                debug!(kind = ?event.kind, ?reason, "realtime: event dropped");
            }
        }
        decision
    }

    pub async fn on_raw_event(self: &Arc<Self>, raw: &Value) -> Result<MatchDecision, SyncError> {
        let Some(event) = PushEvent::from_json(raw) else {
            debug!("realtime: non-object push payload dropped");
            return Err(SyncError::AmbiguousEvent(DropReason::Malformed));
        };
        match self.on_event(event).await {
            MatchDecision::Drop(reason) => Err(SyncError::AmbiguousEvent(reason)),
            decision => Ok(decision),
        }
    }

    /// (Re)arms the resync timer for the open thread. Returns `false` when no
    /// thread is open.
    pub async fn schedule_resync(self: &Arc<Self>) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(token) = guard.token() else {
            return false;
        };
        let engine = Arc::downgrade(self);
        let delay = self.settings.resync_debounce;
        guard.resync_timer.schedule(delay, async move {
            if let Some(engine) = engine.upgrade() {
                engine.run_resync(token).await;
            }
        });
        true
    }

    async fn run_resync(self: Arc<Self>, token: SelectionToken) {
        if !self.inner.lock().await.is_current(&token) {
            debug!(thread_id = %token.thread_id, "realtime: resync for a closed thread skipped");
            return;
        }
        info!(thread_id = %token.thread_id, "realtime: resyncing newest page");
        if let Err(err) = self.load_page(&token.thread_id, 1, true).await {
            debug!(thread_id = %token.thread_id, "realtime: resync not applied: {err}");
        }
    }

    /// Records push connectivity. Coming back online resyncs the open thread
    /// to pick up events missed during the outage.
    pub async fn set_connected(self: &Arc<Self>, connected: bool) {
        let was_connected = {
            let mut guard = self.inner.lock().await;
            std::mem::replace(&mut guard.connected, connected)
        };
        if was_connected == connected {
            return;
        }
        info!(connected, "realtime: push connectivity changed");
        self.emit(SyncEvent::Connectivity(connected));
        if connected {
            self.schedule_resync().await;
        }
    }
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
