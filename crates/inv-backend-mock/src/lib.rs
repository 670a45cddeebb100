// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Deterministic mock backend.
//!
//! Emits one of a fixed table of responses selected by `seed mod N`,
//! token-by-token on whitespace boundaries. Used by unit tests and by the
//! replay verifier, which needs generation to be a pure function of the
//! declared model spec.

use inv_backend_core::{BoxTokenStream, ModelBackend, TokenStream};
use inv_core::{BackendError, ModelSpec};
use std::collections::VecDeque;

/// Fixed response table; `seed mod 5` selects a row.
const RESPONSES: [&str; 5] = [
    "This is a deterministic response A.",
    "This is a deterministic response B.",
    "Execution is proceeding normally.",
    "Invariant system test response.",
    "Checking policy compliance now.",
];

/// A deterministic backend for local development, tests, and replay.
#[derive(Debug, Clone, Default)]
pub struct MockBackend;

impl MockBackend {
    /// The response text a given seed produces, before tokenisation.
    #[must_use]
    pub fn response_for_seed(seed: i64) -> &'static str {
        let idx = seed.rem_euclid(RESPONSES.len() as i64) as usize;
        RESPONSES[idx]
    }
}

#[async_trait::async_trait]
impl ModelBackend for MockBackend {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        _prompt: &str,
        spec: &ModelSpec,
    ) -> Result<BoxTokenStream, BackendError> {
        let response = Self::response_for_seed(spec.seed());
        Ok(Box::new(MockTokenStream::new(response)))
    }
}

/// Tokens are whitespace-inclusive slices, so concatenating the full stream
/// reproduces the response byte-for-byte.
struct MockTokenStream {
    tokens: VecDeque<String>,
}

impl MockTokenStream {
    fn new(response: &str) -> Self {
        Self {
            tokens: response.split_inclusive(' ').map(str::to_string).collect(),
        }
    }
}

#[async_trait::async_trait]
impl TokenStream for MockTokenStream {
    async fn next_token(&mut self) -> Result<Option<String>, BackendError> {
        Ok(self.tokens.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(seed: i64) -> ModelSpec {
        ModelSpec::new("mock", "m", "v1", seed, "greedy", BTreeMap::new()).unwrap()
    }

    async fn collect(seed: i64) -> String {
        let backend = MockBackend;
        let mut stream = backend.generate("Hello", &spec(seed)).await.unwrap();
        let mut out = String::new();
        while let Some(token) = stream.next_token().await.unwrap() {
            out.push_str(&token);
        }
        out
    }

    #[tokio::test]
    async fn seed_forty_selects_response_a() {
        assert_eq!(collect(40).await, "This is a deterministic response A.");
    }

    #[tokio::test]
    async fn seed_selects_table_row_mod_five() {
        assert_eq!(collect(1).await, "This is a deterministic response B.");
        assert_eq!(collect(7).await, "Execution is proceeding normally.");
    }

    #[tokio::test]
    async fn negative_seeds_stay_in_table() {
        // rem_euclid keeps the index non-negative.
        assert_eq!(collect(-1).await, "Checking policy compliance now.");
    }

    #[tokio::test]
    async fn tokens_concatenate_to_the_exact_response() {
        let backend = MockBackend;
        let mut stream = backend.generate("x", &spec(0)).await.unwrap();
        let mut tokens = Vec::new();
        while let Some(t) = stream.next_token().await.unwrap() {
            tokens.push(t);
        }
        assert_eq!(tokens[0], "This ");
        assert_eq!(tokens.last().unwrap(), "A.");
        assert_eq!(tokens.concat(), MockBackend::response_for_seed(0));
    }

    #[tokio::test]
    async fn stream_is_finite() {
        let backend = MockBackend;
        let mut stream = backend.generate("x", &spec(0)).await.unwrap();
        while stream.next_token().await.unwrap().is_some() {}
        assert!(stream.next_token().await.unwrap().is_none());
    }
}
