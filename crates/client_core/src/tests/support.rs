#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{ContentKind, DeliveryStatus, MessageId, ThreadId},
    protocol::{
        MediaDescriptor, MessageDoc, MessagePage, SendMediaMeta, SendResponse, SendTextRequest,
        SenderRole, SortDirection,
    },
};
use tokio::{sync::broadcast, time::Instant};

use crate::{
    AudioCapture, AudioClip, AudioInput, MessageBackend, SyncEngine, SyncEvent, SyncSettings,
    ViewportAnchor, ViewportMetrics,
};

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).single().expect("valid time")
}

pub(crate) fn doc(id: &str, sender: SenderRole, text: &str, minute: i64) -> MessageDoc {
    MessageDoc {
        id: MessageId::new(id),
        sender,
        text: Some(text.to_string()),
        media: None,
        created_at: base_time() + chrono::Duration::minutes(minute),
        status: DeliveryStatus::Delivered,
    }
}

/// `count` messages, oldest first, ids `m1..=m{count}`.
pub(crate) fn history(count: usize) -> Vec<MessageDoc> {
    (1..=count)
        .map(|n| {
            let sender = if n % 2 == 0 {
                SenderRole::Agent
            } else {
                SenderRole::Customer
            };
            doc(&format!("m{n}"), sender, &format!("message {n}"), n as i64)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Fetch { thread_id: ThreadId, page: u32 },
    Search { thread_id: ThreadId, query: String },
    SendText { text: String },
    SendMedia { file_name: String },
}

/// Scripted message store. History is kept oldest first and served newest
/// first, the way the real store pages it.
#[derive(Default)]
pub(crate) struct FakeBackend {
    history: Mutex<HashMap<ThreadId, Vec<MessageDoc>>>,
    search_results: Mutex<HashMap<String, Vec<MessageDoc>>>,
    calls: Mutex<Vec<(Instant, Call)>>,
    fetch_delay: Mutex<Duration>,
    search_delay: Mutex<Duration>,
    send_delay: Mutex<Duration>,
    fail_fetch: AtomicBool,
    fail_search: AtomicBool,
    fail_send: AtomicBool,
    fail_media_named: Mutex<Option<String>>,
    return_canonical: AtomicBool,
    persist_late: AtomicBool,
    sent: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.return_canonical.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub(crate) fn with_history(thread_id: &str, docs: Vec<MessageDoc>) -> Arc<Self> {
        let backend = Self::new();
        backend.set_history(thread_id, docs);
        backend
    }

    pub(crate) fn set_history(&self, thread_id: &str, docs: Vec<MessageDoc>) {
        self.history
            .lock()
            .expect("history lock")
            .insert(ThreadId::new(thread_id), docs);
    }

    pub(crate) fn push_message(&self, thread_id: &str, doc: MessageDoc) {
        self.history
            .lock()
            .expect("history lock")
            .entry(ThreadId::new(thread_id))
            .or_default()
            .push(doc);
    }

    /// Search hits for `query`, oldest first.
    pub(crate) fn set_search_results(&self, query: &str, docs: Vec<MessageDoc>) {
        self.search_results
            .lock()
            .expect("search lock")
            .insert(query.to_string(), docs);
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().expect("delay lock") = delay;
    }

    pub(crate) fn set_search_delay(&self, delay: Duration) {
        *self.search_delay.lock().expect("delay lock") = delay;
    }

    pub(crate) fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().expect("delay lock") = delay;
    }

    pub(crate) fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_media_named(&self, file_name: &str) {
        *self.fail_media_named.lock().expect("fail lock") = Some(file_name.to_string());
    }

    pub(crate) fn return_canonical(&self, enabled: bool) {
        self.return_canonical.store(enabled, Ordering::SeqCst);
    }

    /// Persist sends only once the send delay has elapsed, so a resync during
    /// the delay does not see them yet.
    pub(crate) fn persist_late(&self, enabled: bool) {
        self.persist_late.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn fetches(&self) -> Vec<(Instant, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|(at, call)| match call {
                Call::Fetch { page, .. } => Some((at, page)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .expect("calls lock")
            .push((Instant::now(), call));
    }

    async fn pause(&self, delay: &Mutex<Duration>) {
        let delay = *delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Persists a sent message the way the store would and returns it.
    fn persist(&self, thread_id: &ThreadId, text: Option<String>, media: Option<MediaDescriptor>) -> MessageDoc {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        let doc = MessageDoc {
            id: MessageId::new(format!("srv-{n}")),
            sender: SenderRole::Agent,
            text,
            media,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
        };
        self.history
            .lock()
            .expect("history lock")
            .entry(thread_id.clone())
            .or_default()
            .push(doc.clone());
        doc
    }
}

#[async_trait]
impl MessageBackend for FakeBackend {
    async fn fetch_message_page(
        &self,
        thread_id: &ThreadId,
        page: u32,
        page_size: u32,
        sort: SortDirection,
    ) -> Result<MessagePage> {
        assert_eq!(sort, SortDirection::Desc);
        self.record(Call::Fetch {
            thread_id: thread_id.clone(),
            page,
        });
        self.pause(&self.fetch_delay).await;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }

        let history = self.history.lock().expect("history lock");
        let docs = history
            .get(thread_id)
            .map(|docs| {
                docs.iter()
                    .rev()
                    .skip(((page.max(1) - 1) * page_size) as usize)
                    .take(page_size as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(MessagePage { status: true, docs })
    }

    async fn search_messages(&self, thread_id: &ThreadId, query: &str) -> Result<MessagePage> {
        self.record(Call::Search {
            thread_id: thread_id.clone(),
            query: query.to_string(),
        });
        self.pause(&self.search_delay).await;
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(anyhow!("search backend unavailable"));
        }
        let docs = self
            .search_results
            .lock()
            .expect("search lock")
            .get(query)
            .map(|docs| docs.iter().rev().cloned().collect())
            .unwrap_or_default();
        Ok(MessagePage { status: true, docs })
    }

    async fn send_text(&self, request: SendTextRequest) -> Result<SendResponse> {
        self.record(Call::SendText {
            text: request.text.clone(),
        });
        if self.fail_send.load(Ordering::SeqCst) {
            self.pause(&self.send_delay).await;
            return Err(anyhow!("network unreachable"));
        }
        // By default persisted before the response travels back, so a resync can see it first.
        let doc = if self.persist_late.load(Ordering::SeqCst) {
            self.pause(&self.send_delay).await;
            self.persist(&request.thread_id, Some(request.text), None)
        } else {
            let doc = self.persist(&request.thread_id, Some(request.text), None);
            self.pause(&self.send_delay).await;
            doc
        };
        Ok(SendResponse {
            success: true,
            message: self.return_canonical.load(Ordering::SeqCst).then_some(doc),
        })
    }

    async fn send_media(&self, meta: SendMediaMeta, _bytes: Vec<u8>) -> Result<SendResponse> {
        self.record(Call::SendMedia {
            file_name: meta.file_name.clone(),
        });
        let rejected = self
            .fail_media_named
            .lock()
            .expect("fail lock")
            .as_deref()
            == Some(meta.file_name.as_str());
        if self.fail_send.load(Ordering::SeqCst) || rejected {
            self.pause(&self.send_delay).await;
            return Err(anyhow!("upload rejected"));
        }
        let media = MediaDescriptor {
            kind: meta.media_kind,
            url: format!("https://cdn.example/{}", meta.file_name),
            file_name: Some(meta.file_name),
            caption: meta.caption,
        };
        let doc = if self.persist_late.load(Ordering::SeqCst) {
            self.pause(&self.send_delay).await;
            self.persist(&meta.thread_id, None, Some(media))
        } else {
            let doc = self.persist(&meta.thread_id, None, Some(media));
            self.pause(&self.send_delay).await;
            doc
        };
        Ok(SendResponse {
            success: true,
            message: self.return_canonical.load(Ordering::SeqCst).then_some(doc),
        })
    }
}

/// Fixed-height rows laid out top to bottom.
pub(crate) struct FakeViewport {
    row_height_px: f64,
    metrics: Mutex<ViewportMetrics>,
    scrolled_to: Mutex<Vec<f64>>,
}

impl FakeViewport {
    pub(crate) fn new(row_height_px: f64) -> Arc<Self> {
        Arc::new(Self {
            row_height_px,
            metrics: Mutex::new(ViewportMetrics::default()),
            scrolled_to: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn layout(&self, rows: usize, scroll_offset_px: f64) {
        *self.metrics.lock().expect("metrics lock") = ViewportMetrics {
            scroll_offset_px,
            content_height_px: rows as f64 * self.row_height_px,
        };
    }

    pub(crate) fn row_height(&self) -> f64 {
        self.row_height_px
    }

    pub(crate) fn scrolled_to(&self) -> Vec<f64> {
        self.scrolled_to.lock().expect("scroll lock").clone()
    }
}

#[async_trait]
impl ViewportAnchor for FakeViewport {
    fn metrics(&self) -> ViewportMetrics {
        *self.metrics.lock().expect("metrics lock")
    }

    async fn settle(&self, message_count: usize) -> Result<ViewportMetrics> {
        tokio::task::yield_now().await;
        let mut metrics = self.metrics.lock().expect("metrics lock");
        metrics.content_height_px = message_count as f64 * self.row_height_px;
        Ok(*metrics)
    }

    fn scroll_to(&self, offset_px: f64) {
        self.metrics.lock().expect("metrics lock").scroll_offset_px = offset_px;
        self.scrolled_to.lock().expect("scroll lock").push(offset_px);
    }
}

/// Microphone stand-in that counts how many captures hold the device.
#[derive(Default)]
pub(crate) struct FakeAudioInput {
    held: Arc<AtomicUsize>,
    unavailable: AtomicBool,
    acquire_delay: Mutex<Duration>,
    finish_delay: Mutex<Duration>,
}

impl FakeAudioInput {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn unavailable() -> Arc<Self> {
        let input = Self::default();
        input.unavailable.store(true, Ordering::SeqCst);
        Arc::new(input)
    }

    pub(crate) fn set_acquire_delay(&self, delay: Duration) {
        *self.acquire_delay.lock().expect("delay lock") = delay;
    }

    pub(crate) fn set_finish_delay(&self, delay: Duration) {
        *self.finish_delay.lock().expect("delay lock") = delay;
    }

    pub(crate) fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

struct FakeCapture {
    held: Arc<AtomicUsize>,
    started: Instant,
    finish_delay: Duration,
}

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn finish(self: Box<Self>) -> Result<AudioClip> {
        if !self.finish_delay.is_zero() {
            tokio::time::sleep(self.finish_delay).await;
        }
        self.held.fetch_sub(1, Ordering::SeqCst);
        Ok(AudioClip {
            bytes: vec![0_u8; 64],
            mime_type: "audio/ogg;codecs=opus".into(),
            duration: self.started.elapsed(),
        })
    }

    fn discard(self: Box<Self>) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioInput for FakeAudioInput {
    async fn acquire(&self) -> Result<Box<dyn AudioCapture>> {
        let delay = *self.acquire_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("permission denied"));
        }
        self.held.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            held: Arc::clone(&self.held),
            started: Instant::now(),
            finish_delay: *self.finish_delay.lock().expect("delay lock"),
        }))
    }
}

pub(crate) fn engine(backend: Arc<FakeBackend>) -> Arc<SyncEngine> {
    SyncEngine::new(SyncSettings::default(), backend)
}

pub(crate) fn engine_with(
    settings: SyncSettings,
    backend: Arc<FakeBackend>,
    viewport: Arc<FakeViewport>,
    audio: Arc<FakeAudioInput>,
) -> Arc<SyncEngine> {
    SyncEngine::new_with_dependencies(settings, backend, viewport, audio)
}

pub(crate) fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub(crate) fn texts(messages: &[crate::Message]) -> Vec<String> {
    messages
        .iter()
        .map(|message| message.payload.text().unwrap_or_default().to_string())
        .collect()
}

pub(crate) fn server_ids(messages: &[crate::Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| message.server_id().map(|id| id.to_string()))
        .collect()
}

pub(crate) fn image_doc(id: &str, file_name: &str, minute: i64) -> MessageDoc {
    MessageDoc {
        id: MessageId::new(id),
        sender: SenderRole::Agent,
        text: None,
        media: Some(MediaDescriptor {
            kind: ContentKind::Image,
            url: format!("https://cdn.example/{file_name}"),
            file_name: Some(file_name.to_string()),
            caption: None,
        }),
        created_at: base_time() + chrono::Duration::minutes(minute),
        status: DeliveryStatus::Sent,
    }
}
