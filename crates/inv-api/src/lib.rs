// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-api
//!
//! The public surface of Invariant. Two calls matter:
//! [`Invariant::execute`] runs one mediated turn and returns a sealed
//! [`Turn`]; [`Invariant::verify`] replays a receipt and reports
//! [`VerificationResult::Verified`] or drift. A thin
//! [`Invariant::save_receipt`] writes the signed receipt to disk.
//!
//! ```no_run
//! # use inv_api::*;
//! # use std::collections::BTreeMap;
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let invariant = Invariant::new(BoundaryConfig::default())?;
//! let turn = invariant
//!     .execute(
//!         "Hello",
//!         Identity::new("u1", "admin", "acme", "prod")?,
//!         ModelSpec::new("mock", "m", "v1", 40, "greedy", BTreeMap::new())?,
//!         ContextSpec::empty(),
//!         "default",
//!     )
//!     .await?;
//! invariant.save_receipt(&turn, std::path::Path::new("receipt.json"))?;
//! # Ok(())
//! # }
//! ```

pub use inv_backend_core::{BackendRegistry, BoxTokenStream, ModelBackend, TokenStream};
pub use inv_boundary::{CancelHandle, ExecutionBoundary};
pub use inv_core::{
    BoundaryConfig, BoundaryError, ContextSource, ContextSpec, ExecutionGraph, Identity,
    ModelSpec, ParamValue, Sensitivity, SourceKind, Turn, TurnStatus,
};
pub use inv_receipt::{NodeKey, Receipt, ReceiptError};
pub use inv_replay::{
    DriftField, DriftReport, ReplayOptions, VerificationResult, VerifyError,
};

use chrono::Utc;
use inv_backend_mock::MockBackend;
use inv_backend_openai::ChatBackend;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// The mediated execution entry point.
///
/// Owns the process-wide node key (constructed once, never mutated) and the
/// backend registry. The deterministic mock backend is always registered;
/// the remote chat backend joins when `OPENAI_API_KEY` is present.
pub struct Invariant {
    boundary: ExecutionBoundary,
    node_key: Arc<NodeKey>,
}

impl Invariant {
    /// Construct with the default backend set.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Key`] if a configured key store cannot be
    /// read. An unconfigured store falls back to an ephemeral key.
    pub fn new(config: BoundaryConfig) -> Result<Self, ReceiptError> {
        let mut backends = BackendRegistry::new();
        backends.register(MockBackend);
        if let Some(remote) = ChatBackend::from_env() {
            backends.register(remote);
        }
        Self::with_backends(config, backends)
    }

    /// Construct with an explicit backend registry.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Key`] if a configured key store cannot be
    /// read.
    pub fn with_backends(
        config: BoundaryConfig,
        backends: BackendRegistry,
    ) -> Result<Self, ReceiptError> {
        let node_key = NodeKey::load_or_generate(config.node_key_path.as_deref())?;
        info!(
            target: "inv.api",
            pub_key = %&node_key.public_key_hex()[..16],
            policy_dir = %config.policy_dir.display(),
            "invariant node initialised"
        );
        Ok(Self {
            boundary: ExecutionBoundary::new(config, Arc::new(backends)),
            node_key: Arc::new(node_key),
        })
    }

    /// Execute one mediated turn.
    ///
    /// Policy denials are not errors: a denied or vetoed turn comes back as
    /// an `Ok` turn with [`TurnStatus::Aborted`] and the veto reason.
    ///
    /// # Errors
    ///
    /// Propagates fatal [`BoundaryError`]s (bad input, unresolvable policy
    /// or context, backend failure before the first token).
    pub async fn execute(
        &self,
        input_payload: &str,
        identity: Identity,
        model_spec: ModelSpec,
        context: ContextSpec,
        policy_name: &str,
    ) -> Result<Turn, BoundaryError> {
        self.boundary
            .run(identity, input_payload, model_spec, context, policy_name)
            .await
    }

    /// [`execute`](Self::execute) with a caller-held cancellation handle.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_cancellable(
        &self,
        input_payload: &str,
        identity: Identity,
        model_spec: ModelSpec,
        context: ContextSpec,
        policy_name: &str,
        cancel: CancelHandle,
    ) -> Result<Turn, BoundaryError> {
        self.boundary
            .run_cancellable(identity, input_payload, model_spec, context, policy_name, cancel)
            .await
    }

    /// Build the signed receipt for a turn, stamped with the current time.
    #[must_use]
    pub fn receipt_for(&self, turn: &Turn) -> Receipt {
        Receipt::from_turn(turn, &self.node_key, Utc::now())
    }

    /// Write the signed receipt for a turn to `path`, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Io`] / [`ReceiptError::Json`] on emit
    /// failures.
    pub fn save_receipt(&self, turn: &Turn, path: &Path) -> Result<Receipt, ReceiptError> {
        let receipt = self.receipt_for(turn);
        receipt.write_to(path)?;
        info!(target: "inv.api", path = %path.display(), proof = %receipt.meta.proof_id, "receipt saved");
        Ok(receipt)
    }

    /// Verify a parsed receipt against the live environment.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] when no verdict can be reached; drift is a
    /// verdict, not an error.
    pub async fn verify(
        &self,
        receipt: &Receipt,
        options: &ReplayOptions,
    ) -> Result<VerificationResult, VerifyError> {
        inv_replay::verify(receipt, &self.boundary, options).await
    }

    /// Read a receipt file and verify it.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Receipt`] for unreadable or malformed files,
    /// otherwise as [`verify`](Self::verify).
    pub async fn verify_path(
        &self,
        path: &Path,
        options: &ReplayOptions,
    ) -> Result<VerificationResult, VerifyError> {
        let receipt = Receipt::read_from(path)?;
        self.verify(&receipt, options).await
    }

    /// Hex public key of this node's signing identity.
    #[must_use]
    pub fn node_public_key(&self) -> String {
        self.node_key.public_key_hex()
    }

    /// The underlying boundary (policy store, configuration).
    #[must_use]
    pub fn boundary(&self) -> &ExecutionBoundary {
        &self.boundary
    }
}

impl std::fmt::Debug for Invariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invariant")
            .field("boundary", &self.boundary)
            .field("pub_key", &self.node_public_key())
            .finish()
    }
}
