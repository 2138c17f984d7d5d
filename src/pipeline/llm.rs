//! Transport: one POST to the Responses API and classification of the result.
//!
//! The HTTP call sits behind [`HttpBackend`] so the client can be driven by a
//! fake in tests; [`ReqwestBackend`] is the real implementation.
//!
//! ## Outcome classification
//!
//! | Outcome | Result |
//! |---------|--------|
//! | missing API key | [`AskError::Auth`] (no network call) |
//! | blank prompt | [`AskError::Validation`] (no network call) |
//! | non-2xx | [`AskError::Transport`] with `error.message`, `message`, or `HTTP <status> <text> :: <body[..500]>` |
//! | 2xx, JSON body | [`RawResponse::Json`] |
//! | 2xx, other body | [`RawResponse::Text`] |
//! | connection failure | [`AskError::Network`], source untouched |
//!
//! There are no retries and no timeout: a single attempt, the caller decides
//! whether to try again.

use crate::error::{AskError, BoxError};
use crate::pipeline::request::LlmRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum number of body characters quoted in logs and synthesised errors.
const BODY_PREVIEW_CHARS: usize = 500;

/// Raw HTTP outcome, body already read as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The decoded body of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    Json(Value),
    Text(String),
}

/// Performs the single POST.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// POST `body` as JSON with a bearer token and return the full reply.
    ///
    /// `Err` only for failures that produced no HTTP response at all.
    async fn post_json(&self, url: &str, api_key: &str, body: &Value) -> Result<HttpReply, BoxError>;
}

/// [`HttpBackend`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestBackend {
    http: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn post_json(&self, url: &str, api_key: &str, body: &Value) -> Result<HttpReply, BoxError> {
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok(HttpReply {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}

/// Client for the Responses API.
pub struct ResponsesClient<B = ReqwestBackend> {
    backend: B,
    endpoint: String,
}

impl ResponsesClient<ReqwestBackend> {
    /// Client using `reqwest` against `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_backend(ReqwestBackend::new(), endpoint)
    }
}

impl<B: HttpBackend> ResponsesClient<B> {
    pub fn with_backend(backend: B, endpoint: impl Into<String>) -> Self {
        Self {
            backend,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Send one request. See the module docs for the outcome table.
    pub async fn send(&self, request: LlmRequest, api_key: &str) -> Result<RawResponse, AskError> {
        let api_key = api_key.trim();
        preflight(api_key, &request.user_text)?;

        let body = request.to_body();
        info!(
            "POST {} model={} files={} (~{} bytes) key={}",
            self.endpoint,
            request.model,
            request.files.len(),
            request.attached_bytes(),
            redact_key(api_key)
        );

        let start = Instant::now();
        let reply = self
            .backend
            .post_json(&self.endpoint, api_key, &body)
            .await
            .map_err(|source| {
                warn!("Network failure talking to {}: {}", self.endpoint, source);
                AskError::Network { source }
            })?;

        debug!(
            "HTTP {} in {}ms, body preview: {}",
            reply.status,
            start.elapsed().as_millis(),
            preview(&reply.body)
        );

        classify(reply)
    }
}

/// Checks performed before any network activity.
pub fn preflight(api_key: &str, user_text: &str) -> Result<(), AskError> {
    if api_key.trim().is_empty() {
        return Err(AskError::Auth);
    }
    if user_text.trim().is_empty() {
        return Err(AskError::Validation("enter a question before sending".into()));
    }
    Ok(())
}

/// Turn an HTTP reply into a raw response or a transport error.
pub fn classify(reply: HttpReply) -> Result<RawResponse, AskError> {
    if !reply.is_success() {
        let message = error_message(&reply.body).unwrap_or_else(|| {
            format!(
                "HTTP {} {} :: {}",
                reply.status,
                reply.status_text,
                preview(&reply.body)
            )
        });
        warn!("Provider returned HTTP {}: {}", reply.status, message);
        return Err(AskError::Transport {
            status: reply.status,
            message,
        });
    }

    match serde_json::from_str::<Value>(&reply.body) {
        Ok(json) => Ok(RawResponse::Json(json)),
        Err(e) => {
            debug!("2xx body is not JSON ({}); passing text through", e);
            Ok(RawResponse::Text(reply.body))
        }
    }
}

/// `error.message` or top-level `message` from a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .or_else(|| {
            json.get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.trim().is_empty())
        })
        .map(str::to_string)
}

/// Redacted form of an API key for diagnostics, e.g. `sk-***REDACTED***`.
pub fn redact_key(key: &str) -> String {
    const MASK: &str = "***REDACTED***";
    let key = key.trim();
    if key.is_empty() {
        return "<none>".to_string();
    }
    match key.split_once('-') {
        Some((prefix, rest)) if !rest.is_empty() && prefix.len() <= 4 => format!("{prefix}-{MASK}"),
        _ => MASK.to_string(),
    }
}

/// First [`BODY_PREVIEW_CHARS`] characters of `body`.
fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}
