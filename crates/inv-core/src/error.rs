// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for boundary execution.
//!
//! Policy violations are *not* errors: a denied or vetoed turn still seals
//! an `ABORTED` receipt and is surfaced structurally via
//! [`TurnStatus`](crate::TurnStatus). Everything here is fatal to the turn
//! and produces no receipt.

use inv_canon::CanonError;

/// Fatal errors raised before or during a turn.
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    /// Malformed Identity, ModelSpec, or ContextSpec.
    #[error("invalid input: {0}")]
    Input(String),

    /// The policy identifier did not resolve or the document is malformed.
    #[error("policy '{name}' could not be loaded: {reason}")]
    PolicyLoad {
        /// Logical name or path that was requested.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// A hashable context source is missing or unreadable.
    #[error("context source '{identifier}' could not be resolved")]
    ContextResolution {
        /// Identifier of the failing source.
        identifier: String,
        /// Underlying digest failure.
        #[source]
        source: CanonError,
    },

    /// Canonical encoding of proof material failed.
    #[error("canonical encoding failed")]
    Canon(#[from] CanonError),

    /// The model backend failed before any token was produced.
    #[error("backend failure")]
    Backend(#[from] BackendError),
}

/// Failures from a model backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No backend is registered for the requested provider.
    #[error("no backend registered for provider '{0}'")]
    UnknownProvider(String),

    /// Network-level failure reaching the provider.
    #[error("network failure talking to model backend: {0}")]
    Network(String),

    /// The provider answered with something the adapter cannot interpret,
    /// or the declared model spec cannot be translated for it.
    #[error("backend protocol error: {0}")]
    Protocol(String),

    /// The provider rejected the request (auth, quota, bad model name).
    #[error("backend refused the request: {0}")]
    Rejected(String),
}
