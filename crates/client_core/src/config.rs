use std::{fs, path::Path, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use tracing::warn;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "transcript_sync.toml";

/// How a successful send reconciles its provisional entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStrategy {
    /// Swap the provisional entry for the canonical copy returned by the send.
    #[default]
    InPlace,
    /// Mark it sent and schedule a debounced reload of the newest page.
    Reload,
}

impl FromStr for ReconcileStrategy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "in_place" | "in-place" | "inplace" => Ok(Self::InPlace),
            "reload" => Ok(Self::Reload),
            other => Err(anyhow!("unknown reconcile strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub server_url: String,
    pub push_url: Option<String>,
    pub auth_token: Option<String>,
    pub sender_identity: String,
    pub page_size: u32,
    pub load_more_threshold_px: f64,
    pub resync_debounce: Duration,
    pub search_debounce: Duration,
    pub reconcile_window: Duration,
    pub reconcile_strategy: ReconcileStrategy,
    pub event_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            push_url: None,
            auth_token: None,
            sender_identity: "agent".into(),
            page_size: 20,
            load_more_threshold_px: 50.0,
            resync_debounce: Duration::from_millis(500),
            search_debounce: Duration::from_millis(500),
            reconcile_window: Duration::from_secs(120),
            reconcile_strategy: ReconcileStrategy::InPlace,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    push_url: Option<String>,
    auth_token: Option<String>,
    sender_identity: Option<String>,
    page_size: Option<u32>,
    load_more_threshold_px: Option<f64>,
    resync_debounce_ms: Option<u64>,
    search_debounce_ms: Option<u64>,
    reconcile_window_secs: Option<u64>,
    reconcile_strategy: Option<ReconcileStrategy>,
}

impl SyncSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        let url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("server_url must start with http:// or https://");
        }
        Ok(())
    }

    /// Websocket endpoint for push events: `push_url` when set, otherwise
    /// `server_url` with the scheme swapped and `/ws` appended.
    pub fn push_endpoint(&self) -> anyhow::Result<String> {
        if let Some(push_url) = &self.push_url {
            return Ok(push_url.clone());
        }
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => bail!("cannot derive a push endpoint from scheme '{other}'"),
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow!("failed to switch scheme to {scheme}"))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("server_url cannot be a base url"))?
            .pop_if_empty()
            .push("ws");
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.to_string())
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.push_url {
            self.push_url = Some(v);
        }
        if let Some(v) = file.auth_token {
            self.auth_token = Some(v);
        }
        if let Some(v) = file.sender_identity {
            self.sender_identity = v;
        }
        if let Some(v) = file.page_size {
            self.page_size = v;
        }
        if let Some(v) = file.load_more_threshold_px {
            self.load_more_threshold_px = v;
        }
        if let Some(v) = file.resync_debounce_ms {
            self.resync_debounce = Duration::from_millis(v);
        }
        if let Some(v) = file.search_debounce_ms {
            self.search_debounce = Duration::from_millis(v);
        }
        if let Some(v) = file.reconcile_window_secs {
            self.reconcile_window = Duration::from_secs(v);
        }
        if let Some(v) = file.reconcile_strategy {
            self.reconcile_strategy = v;
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__PUSH_URL") {
            self.push_url = Some(v);
        }
        if let Some(v) = lookup("APP__AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Some(v) = lookup("APP__SENDER_IDENTITY") {
            self.sender_identity = v;
        }
        if let Some(parsed) = lookup("APP__PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.page_size = parsed;
        }
        if let Some(parsed) = lookup("APP__RESYNC_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            self.resync_debounce = Duration::from_millis(parsed);
        }
        if let Some(parsed) = lookup("APP__SEARCH_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            self.search_debounce = Duration::from_millis(parsed);
        }
        if let Some(parsed) = lookup("APP__RECONCILE_STRATEGY").and_then(|v| v.parse().ok()) {
            self.reconcile_strategy = parsed;
        }
    }
}

pub fn load_settings() -> SyncSettings {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_settings_from(path: &Path) -> SyncSettings {
    let mut settings = SyncSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => settings.apply_file(file_cfg),
            Err(err) => warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings
}
