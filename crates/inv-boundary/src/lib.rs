// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-boundary
//!
//! The execution boundary: load policy → freeze model and context → admit →
//! drive the token loop → seal. One boundary call is one [`Turn`].
//!
//! ```text
//!   IDLE ── load_policy ──▶ POLICY_LOADED
//!   POLICY_LOADED ── freeze(model,ctx) ──▶ FROZEN
//!   FROZEN ── admit(input) ──▶ ADMITTED          (on allow)
//!   FROZEN ── admit(input) ──▶ ABORTED           (on deny; terminal)
//!   ADMITTED ── stream_step ──▶ ADMITTED         (on allow)
//!   ADMITTED ── stream_step ──▶ ABORTED          (on veto; terminal)
//!   ADMITTED ── stream_end ──▶ FINALIZING
//!   FINALIZING ── finalize ──▶ SEALED            (on ok; terminal)
//!   FINALIZING ── finalize ──▶ ABORTED           (on veto; terminal)
//! ```
//!
//! Both terminal states seal a proof; an aborted turn records the veto
//! reason and the accepted prefix. The vetoed token itself is never part of
//! the output, the proof, or anything the caller sees.

/// Caller-side cancellation handle.
pub mod cancel;

pub use cancel::CancelHandle;

use inv_backend_core::BackendRegistry;
use inv_core::{
    BoundaryConfig, BoundaryError, ContextSpec, ExecutionGraph, Identity, ModelSpec, Turn,
    TurnStatus,
};
use inv_policy::PolicyStore;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Reason string recorded for caller cancels and deadline expiry.
pub const CANCELLED_REASON: &str = "cancelled";

/// Lifecycle states of one turn. Mostly useful for tracing; the run method
/// moves through them linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    /// Nothing loaded yet.
    Idle,
    /// Policy compiled.
    PolicyLoaded,
    /// Model and context frozen into a graph.
    Frozen,
    /// Pre-admission passed; streaming.
    Admitted,
    /// Stream ended; whole-output check pending.
    Finalizing,
    /// Terminal: sealed cleanly.
    Sealed,
    /// Terminal: aborted by a veto.
    Aborted,
}

/// How the token loop ended.
enum StreamEnd {
    Completed,
    Vetoed(String),
    Cancelled,
    BackendFailed(inv_core::BackendError),
}

/// The execution boundary.
///
/// Single-threaded cooperative within a turn: the boundary is the only
/// consumer of the backend's token stream, and token inspections happen
/// strictly in emission order. Run concurrent turns on separate boundary
/// instances; the policy store is pure and shared safely.
pub struct ExecutionBoundary {
    policies: Arc<PolicyStore>,
    backends: Arc<BackendRegistry>,
    config: BoundaryConfig,
}

impl ExecutionBoundary {
    /// Create a boundary over a backend registry.
    #[must_use]
    pub fn new(config: BoundaryConfig, backends: Arc<BackendRegistry>) -> Self {
        let policies = Arc::new(PolicyStore::new(&config.policy_dir));
        Self {
            policies,
            backends,
            config,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    /// The policy store (shared, content-hash cached).
    #[must_use]
    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    /// Execute one turn. See [`run_cancellable`](Self::run_cancellable).
    ///
    /// # Errors
    ///
    /// Propagates every fatal [`BoundaryError`]; policy violations are not
    /// errors and come back as an aborted [`Turn`].
    pub async fn run(
        &self,
        identity: Identity,
        input_payload: &str,
        model_spec: ModelSpec,
        raw_context: ContextSpec,
        policy_name: &str,
    ) -> Result<Turn, BoundaryError> {
        self.run_cancellable(
            identity,
            input_payload,
            model_spec,
            raw_context,
            policy_name,
            CancelHandle::new(),
        )
        .await
    }

    /// Execute one turn with a caller-held cancellation handle.
    ///
    /// Cancellation and deadline expiry are synthetic vetoes with reason
    /// [`CANCELLED_REASON`]: the turn seals `ABORTED` over whatever prefix
    /// was accepted.
    ///
    /// # Errors
    ///
    /// - [`BoundaryError::PolicyLoad`] — unresolvable or malformed policy
    /// - [`BoundaryError::Input`] / [`BoundaryError::ContextResolution`] —
    ///   freeze failures
    /// - [`BoundaryError::Backend`] — backend failure before any token
    pub async fn run_cancellable(
        &self,
        identity: Identity,
        input_payload: &str,
        model_spec: ModelSpec,
        raw_context: ContextSpec,
        policy_name: &str,
        cancel: CancelHandle,
    ) -> Result<Turn, BoundaryError> {
        let mut state = BoundaryState::Idle;
        debug!(target: "inv.boundary", ?state, policy = %policy_name, "turn starting");

        let policy = self.policies.load(policy_name)?;
        state = BoundaryState::PolicyLoaded;
        debug!(target: "inv.boundary", ?state, policy = %policy.name(), "policy loaded");

        let frozen_context = raw_context.freeze(self.config.allow_unknown_sensitivity)?;
        let graph = ExecutionGraph::seal(
            identity,
            input_payload,
            policy.policy_ref()?,
            model_spec,
            frozen_context,
        )?;
        state = BoundaryState::Frozen;
        debug!(target: "inv.boundary", ?state, graph_id = %graph.id(), "graph frozen");

        let admission = policy.admit(graph.input_payload());
        if !admission.is_allowed() {
            let reason = admission.reason().unwrap_or("denied").to_string();
            info!(target: "inv.boundary", graph_id = %graph.id(), %reason, "pre-admission denied");
            return Turn::seal(graph, String::new(), TurnStatus::Aborted, Some(reason));
        }
        state = BoundaryState::Admitted;
        debug!(target: "inv.boundary", ?state, "pre-admission passed");

        let backend = self.backends.get(graph.model().provider())?;
        let mut stream = backend.generate(graph.input_payload(), graph.model()).await?;

        let deadline = self.config.deadline.map(|d| Instant::now() + d);
        let mut output = String::new();
        let mut accepted = 0usize;

        let end = loop {
            let mut pull = stream.next_token();
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                res = pull_bounded(&mut pull, deadline) => match res {
                    Some(r) => r,
                    None => break StreamEnd::Cancelled,
                },
            };
            drop(pull);

            match next {
                Err(e) if accepted == 0 => {
                    drop(stream);
                    return Err(e.into());
                }
                Err(e) => break StreamEnd::BackendFailed(e),
                Ok(None) => break StreamEnd::Completed,
                Ok(Some(token)) => {
                    let decision = policy.inspect(&token, &output);
                    if !decision.is_allowed() {
                        let reason = decision.reason().unwrap_or("vetoed").to_string();
                        break StreamEnd::Vetoed(reason);
                    }
                    output.push_str(&token);
                    accepted += 1;
                }
            }
        };
        // Stop pulling; conformant backends release resources on drop.
        drop(stream);

        match end {
            StreamEnd::Completed => {
                state = BoundaryState::Finalizing;
                debug!(target: "inv.boundary", ?state, tokens = accepted, "stream complete");
                let fin = policy.finalize(&output);
                if fin.is_allowed() {
                    info!(target: "inv.boundary", graph_id = %graph.id(), tokens = accepted, "turn sealed");
                    Turn::seal(graph, output, TurnStatus::Sealed, None)
                } else {
                    let reason = fin.reason().unwrap_or("vetoed").to_string();
                    info!(target: "inv.boundary", graph_id = %graph.id(), %reason, "finalize vetoed");
                    Turn::seal(graph, output, TurnStatus::Aborted, Some(reason))
                }
            }
            StreamEnd::Vetoed(reason) => {
                info!(
                    target: "inv.boundary",
                    graph_id = %graph.id(),
                    token_index = accepted,
                    %reason,
                    "mid-stream veto"
                );
                Turn::seal(graph, output, TurnStatus::Aborted, Some(reason))
            }
            StreamEnd::Cancelled => {
                info!(target: "inv.boundary", graph_id = %graph.id(), "turn cancelled");
                Turn::seal(
                    graph,
                    output,
                    TurnStatus::Aborted,
                    Some(CANCELLED_REASON.to_string()),
                )
            }
            StreamEnd::BackendFailed(e) => {
                // At least one token was accepted: seal the partial stream.
                warn!(target: "inv.boundary", graph_id = %graph.id(), error = %e, "backend failed mid-stream");
                Turn::seal(
                    graph,
                    output,
                    TurnStatus::Aborted,
                    Some(format!("backend_error: {e}")),
                )
            }
        }
    }
}

impl std::fmt::Debug for ExecutionBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionBoundary")
            .field("policy_dir", &self.config.policy_dir)
            .field("backends", &self.backends)
            .finish()
    }
}

/// Await a pull, bounded by the turn deadline. `None` means the deadline
/// expired.
async fn pull_bounded<F, T>(pull: &mut F, deadline: Option<Instant>) -> Option<T>
where
    F: std::future::Future<Output = T> + Unpin,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, pull).await.ok(),
        None => Some(pull.await),
    }
}
