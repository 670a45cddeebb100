// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-backend-core
//!
//! The typed port between the execution boundary and model backends.
//!
//! Backends expose a *pull* interface: the boundary awaits one token at a
//! time. Dropping the stream before the next pull is the cancellation
//! signal; conformant backends release their underlying resources
//! (connections, tasks) on drop.

use inv_core::{BackendError, ModelSpec};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A finite, pull-based sequence of token strings.
#[async_trait::async_trait]
pub trait TokenStream: Send {
    /// Await the next token. `Ok(None)` is end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the backend fails mid-stream.
    async fn next_token(&mut self) -> Result<Option<String>, BackendError>;
}

/// Boxed stream returned by [`ModelBackend::generate`].
pub type BoxTokenStream = Box<dyn TokenStream>;

impl std::fmt::Debug for dyn TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn TokenStream>")
    }
}

/// A generation backend honouring a declared [`ModelSpec`].
///
/// The spec is *declared* configuration: the backend must honour `seed` and
/// `decoding_strategy` or proofs over its output are meaningless.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    /// The provider id this backend serves (e.g. `"mock"`, `"openai"`).
    fn provider(&self) -> &str;

    /// Open a token stream for a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the stream cannot be opened.
    async fn generate(
        &self,
        prompt: &str,
        spec: &ModelSpec,
    ) -> Result<BoxTokenStream, BackendError>;
}

/// Named registry of backends, keyed by provider id.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ModelBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its provider id, replacing any previous
    /// registration.
    pub fn register<B: ModelBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.provider().to_string(), Arc::new(backend));
    }

    /// Look up the backend for a provider.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownProvider`] when nothing is registered.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ModelBackend>, BackendError> {
        self.backends
            .get(provider)
            .cloned()
            .ok_or_else(|| BackendError::UnknownProvider(provider.to_string()))
    }

    /// Sorted provider ids.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyStream;

    #[async_trait::async_trait]
    impl TokenStream for EmptyStream {
        async fn next_token(&mut self) -> Result<Option<String>, BackendError> {
            Ok(None)
        }
    }

    struct NullBackend;

    #[async_trait::async_trait]
    impl ModelBackend for NullBackend {
        fn provider(&self) -> &str {
            "null"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _spec: &ModelSpec,
        ) -> Result<BoxTokenStream, BackendError> {
            Ok(Box::new(EmptyStream))
        }
    }

    #[tokio::test]
    async fn registry_resolves_registered_providers() {
        let mut reg = BackendRegistry::new();
        reg.register(NullBackend);

        assert_eq!(reg.providers(), vec!["null".to_string()]);
        let backend = reg.get("null").unwrap();
        let spec = ModelSpec::new("null", "m", "v1", 0, "greedy", BTreeMap::new()).unwrap();
        let mut stream = backend.generate("hi", &spec).await.unwrap();
        assert!(stream.next_token().await.unwrap().is_none());
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let reg = BackendRegistry::new();
        assert!(matches!(
            reg.get("ghost"),
            Err(BackendError::UnknownProvider(_))
        ));
    }
}
