use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::ThreadId,
    error::ApiError,
    protocol::{MessagePage, PageQuery, SendMediaMeta, SendResponse, SendTextRequest, SortDirection},
};
use tracing::warn;
use url::Url;

use crate::config::SyncSettings;

/// Remote message store.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn fetch_message_page(
        &self,
        thread_id: &ThreadId,
        page: u32,
        page_size: u32,
        sort: SortDirection,
    ) -> Result<MessagePage>;

    async fn search_messages(&self, thread_id: &ThreadId, query: &str) -> Result<MessagePage>;

    async fn send_text(&self, request: SendTextRequest) -> Result<SendResponse>;

    async fn send_media(&self, meta: SendMediaMeta, bytes: Vec<u8>) -> Result<SendResponse>;
}

pub struct MissingMessageBackend;

#[async_trait]
impl MessageBackend for MissingMessageBackend {
    async fn fetch_message_page(
        &self,
        _thread_id: &ThreadId,
        _page: u32,
        _page_size: u32,
        _sort: SortDirection,
    ) -> Result<MessagePage> {
        Err(anyhow!("message backend is not configured"))
    }

    async fn search_messages(&self, _thread_id: &ThreadId, _query: &str) -> Result<MessagePage> {
        Err(anyhow!("message backend is not configured"))
    }

    async fn send_text(&self, _request: SendTextRequest) -> Result<SendResponse> {
        Err(anyhow!("message backend is not configured"))
    }

    async fn send_media(&self, _meta: SendMediaMeta, _bytes: Vec<u8>) -> Result<SendResponse> {
        Err(anyhow!("message backend is not configured"))
    }
}

pub struct HttpMessageBackend {
    http: Client,
    server_url: Url,
    auth_token: Option<String>,
}

impl HttpMessageBackend {
    pub fn new(server_url: &str, auth_token: Option<String>) -> Result<Self> {
        let server_url =
            Url::parse(server_url).with_context(|| format!("invalid server_url '{server_url}'"))?;
        if server_url.cannot_be_a_base() {
            return Err(anyhow!("server_url '{server_url}' cannot carry a path"));
        }
        Ok(Self {
            http: Client::new(),
            server_url,
            auth_token,
        })
    }

    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        Self::new(&settings.server_url, settings.auth_token.clone())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("server_url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Decodes a success body, or turns an error response into an error carrying
/// the server's `ApiError` when it sent one.
async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .with_context(|| format!("{operation}: malformed response body"));
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => {
            warn!(
                operation,
                %status,
                code = ?api_error.code,
                retryable = api_error.is_retryable(),
                "transport: request rejected"
            );
            Err(anyhow::Error::new(api_error).context(format!("{operation}: server returned {status}")))
        }
        Err(_) => Err(anyhow!("{operation}: server returned {status}")),
    }
}

#[async_trait]
impl MessageBackend for HttpMessageBackend {
    async fn fetch_message_page(
        &self,
        thread_id: &ThreadId,
        page: u32,
        page_size: u32,
        sort: SortDirection,
    ) -> Result<MessagePage> {
        let url = self.endpoint(&["messages", thread_id.as_str()])?;
        let response = self
            .authorized(self.http.get(url))
            .query(&PageQuery {
                page,
                limit: page_size,
                sort,
            })
            .send()
            .await
            .context("fetch message page")?;
        decode("fetch message page", response).await
    }

    async fn search_messages(&self, thread_id: &ThreadId, query: &str) -> Result<MessagePage> {
        let url = self.endpoint(&["messages", thread_id.as_str(), "search"])?;
        let response = self
            .authorized(self.http.get(url))
            .query(&[("q", query)])
            .send()
            .await
            .context("search messages")?;
        decode("search messages", response).await
    }

    async fn send_text(&self, request: SendTextRequest) -> Result<SendResponse> {
        let url = self.endpoint(&["messages", "send-text"])?;
        let response = self
            .authorized(self.http.post(url))
            .json(&request)
            .send()
            .await
            .context("send text")?;
        decode("send text", response).await
    }

    async fn send_media(&self, meta: SendMediaMeta, bytes: Vec<u8>) -> Result<SendResponse> {
        let url = self.endpoint(&["messages", "send-media"])?;
        let response = self
            .authorized(self.http.post(url))
            .query(&meta)
            .header(reqwest::header::CONTENT_TYPE, meta.mime_type.as_str())
            .body(bytes)
            .send()
            .await
            .context("send media")?;
        decode("send media", response).await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
