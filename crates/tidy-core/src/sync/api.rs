//! REST client that replays queued changes against the backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::models::{ChangeKind, SyncChange};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend refused the payload; retrying cannot help
    #[error("Remote rejected change: {message}")]
    Rejected { status: u16, message: String },
    #[error("Remote API error: {message}")]
    Api { status: u16, message: String },
    /// The queued payload lacks a field the route needs
    #[error("Invalid change payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Terminal errors mark the change failed without further retries.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::InvalidPayload(_) | Self::InvalidConfiguration(_)
        )
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Backend the sync queue delivers changes to
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Deliver one change
    async fn apply(&self, change: &SyncChange) -> RemoteResult<()>;

    /// Cheap connectivity probe
    async fn is_reachable(&self) -> bool;
}

/// Remote used when no backend is configured; every delivery is retryable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRemote;

#[async_trait]
impl RemoteApi for NullRemote {
    async fn apply(&self, _change: &SyncChange) -> RemoteResult<()> {
        Err(RemoteError::Api {
            status: 0,
            message: "no backend configured".to_string(),
        })
    }

    async fn is_reachable(&self) -> bool {
        false
    }
}

/// reqwest implementation of `RemoteApi`
#[derive(Clone)]
pub struct HttpRemoteApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteApi {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteApi")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Build a client from the engine config, or `None` when no backend is set.
    pub fn from_config(config: &EngineConfig) -> RemoteResult<Option<Self>> {
        match &config.api_base_url {
            Some(base_url) => Self::new(
                base_url.clone(),
                config.api_token.clone(),
                config.http_timeout(),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> RemoteResult<()> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(RemoteError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn apply(&self, change: &SyncChange) -> RemoteResult<()> {
        tracing::debug!("Delivering {} change {}", change.kind, change.id);
        let builder = match change.kind {
            ChangeKind::CreateElement | ChangeKind::UpdateElement => self
                .request(reqwest::Method::POST, "/elementos/saveUpdate")
                .json(&change.payload),
            ChangeKind::DeleteElement => {
                let id = element_id(&change.payload)?;
                self.request(
                    reqwest::Method::POST,
                    &format!("/elementos/eliminarElemento/{}", urlencoding::encode(&id)),
                )
                .json(&serde_json::json!({}))
            }
            ChangeKind::UpdateProfile => self
                .request(reqwest::Method::PUT, "/usuarios/profile")
                .json(&change.payload),
            ChangeKind::CreateMessage => {
                let chat_id = change
                    .payload
                    .get("chatId")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|chat_id| normalize_text_option(Some(chat_id.to_string())))
                    .ok_or_else(|| {
                        RemoteError::InvalidPayload("message change has no chatId".to_string())
                    })?;
                let message = change
                    .payload
                    .get("message")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                self.request(
                    reqwest::Method::POST,
                    &format!("/chats/{}/mensajes", urlencoding::encode(&chat_id)),
                )
                .json(&message)
            }
        };
        self.send(builder).await
    }

    async fn is_reachable(&self) -> bool {
        match self.request(reqwest::Method::GET, "/").send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Backend unreachable: {}", error);
                false
            }
        }
    }
}

fn element_id(payload: &serde_json::Value) -> RemoteResult<String> {
    match payload.get("id") {
        Some(serde_json::Value::Number(number)) => Ok(number.to_string()),
        Some(serde_json::Value::String(text)) if !text.trim().is_empty() => {
            Ok(text.trim().to_string())
        }
        _ => Err(RemoteError::InvalidPayload(
            "delete change has no element id".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
