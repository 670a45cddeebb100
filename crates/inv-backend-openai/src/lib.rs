// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-backend-openai
//!
//! Remote chat-completion backend. Forwards to any OpenAI-compatible
//! endpoint with `stream=true`, parses server-sent events into tokens,
//! translates the declared decoding strategy to a temperature, and passes
//! the seed through. The per-turn endpoint can be overridden with the
//! `base_url` extra parameter (OpenRouter et al.).
//!
//! Network failures surface as [`BackendError::Network`]; the boundary
//! decides whether the turn dies or seals a partial stream.

mod sse;

use futures::{Stream, StreamExt};
use inv_backend_core::{BoxTokenStream, ModelBackend, TokenStream};
use inv_core::{BackendError, ModelSpec, ParamValue};
use sse::SseLine;
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::debug;

/// Default API root when no `base_url` extra parameter is declared.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Environment variable carrying the bearer token.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// A streaming chat-completion backend.
#[derive(Debug, Clone)]
pub struct ChatBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ChatBackend {
    /// Create a backend with an explicit API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the default API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build from `OPENAI_API_KEY`, or `None` when unset.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(API_KEY_ENV).ok().map(Self::new)
    }

    fn base_url_for(&self, spec: &ModelSpec) -> String {
        match spec.extra_params().get("base_url") {
            Some(ParamValue::Str(url)) => url.clone(),
            _ => self.base_url.clone(),
        }
    }
}

/// Translate a declared decoding strategy into a sampling temperature.
///
/// `"greedy"` maps to `0.0`; `"temperature=<f>"` parses the value. Anything
/// else cannot be honoured and is refused rather than silently approximated.
///
/// # Errors
///
/// Returns [`BackendError::Protocol`] for an untranslatable strategy.
pub fn temperature_for(decoding_strategy: &str) -> Result<f64, BackendError> {
    if decoding_strategy == "greedy" {
        return Ok(0.0);
    }
    if let Some(raw) = decoding_strategy.strip_prefix("temperature=") {
        return raw.parse::<f64>().map_err(|_| {
            BackendError::Protocol(format!(
                "unparseable temperature in decoding strategy '{decoding_strategy}'"
            ))
        });
    }
    Err(BackendError::Protocol(format!(
        "decoding strategy '{decoding_strategy}' is not supported by chat-completion backends"
    )))
}

#[async_trait::async_trait]
impl ModelBackend for ChatBackend {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &str,
        spec: &ModelSpec,
    ) -> Result<BoxTokenStream, BackendError> {
        let base_url = self.base_url_for(spec);
        let temperature = temperature_for(spec.decoding_strategy())?;

        let body = serde_json::json!({
            "model": spec.name(),
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
            "seed": spec.seed(),
            "stream": true,
        });

        debug!(
            target: "inv.backend",
            model = %spec.name(),
            base_url = %base_url,
            "opening chat-completion stream"
        );

        let response = self
            .client
            .post(format!("{base_url}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected(format!(
                "{status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let bytes = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(|e| e.to_string()));
        Ok(Box::new(SseTokenStream::new(Box::pin(bytes))))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

/// Incremental SSE decoder over a byte stream.
///
/// Dropping this stream drops the underlying HTTP body, which aborts the
/// request — that is the cancellation path after a veto.
struct SseTokenStream {
    inner: ByteStream,
    buf: String,
    pending: VecDeque<String>,
    done: bool,
}

impl SseTokenStream {
    fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: String::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            match sse::parse_sse_line(&line) {
                SseLine::Delta(delta) => self.pending.push_back(delta),
                SseLine::Done => self.done = true,
                SseLine::Skip => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl TokenStream for SseTokenStream {
    async fn next_token(&mut self) -> Result<Option<String>, BackendError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            if self.done {
                return Ok(None);
            }
            match self.inner.next().await {
                None => {
                    self.done = true;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(BackendError::Network(e));
                }
                Some(Ok(chunk)) => {
                    self.buf.push_str(&String::from_utf8_lossy(&chunk));
                    self.drain_lines();
                }
            }
        }
    }
}
