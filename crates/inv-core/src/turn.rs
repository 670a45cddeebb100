// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sealed turn results.

use crate::{BoundaryError, ExecutionGraph};
use inv_canon::CanonError;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Terminal status of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnStatus {
    /// The stream completed and every policy gate passed.
    Sealed,
    /// A policy gate denied the turn; output is the accepted prefix.
    Aborted,
}

impl TurnStatus {
    /// Stable wire string (`"SEALED"` / `"ABORTED"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sealed => "SEALED",
            Self::Aborted => "ABORTED",
        }
    }
}

/// Compute the proof digest for a turn.
///
/// The proof is a pure function of the graph id, the sealed output bytes,
/// the terminal status, and the abort reason (or null).
///
/// # Errors
///
/// Returns [`CanonError`] if canonical encoding fails (it cannot for these
/// inputs, but the signature is honest).
pub fn compute_proof(
    graph_id: &str,
    output: &str,
    status: TurnStatus,
    abort_reason: Option<&str>,
) -> Result<String, CanonError> {
    inv_canon::digest_value_hex(&json!({
        "graph_id": graph_id,
        "output": output,
        "status": status.as_str(),
        "abort_reason": abort_reason,
    }))
}

/// One complete execution: the graph, what came out, and the sealed proof.
#[derive(Debug, Clone)]
pub struct Turn {
    graph: ExecutionGraph,
    output: String,
    status: TurnStatus,
    abort_reason: Option<String>,
    proof: String,
}

impl Turn {
    /// Seal a turn, computing its proof.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Canon`] if the proof cannot be encoded.
    pub fn seal(
        graph: ExecutionGraph,
        output: String,
        status: TurnStatus,
        abort_reason: Option<String>,
    ) -> Result<Self, BoundaryError> {
        let proof = compute_proof(graph.id(), &output, status, abort_reason.as_deref())?;
        Ok(Self {
            graph,
            output,
            status,
            abort_reason,
            proof,
        })
    }

    /// The sealed graph.
    #[must_use]
    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }
    /// The output observed up to sealing or abort.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }
    /// Terminal status.
    #[must_use]
    pub fn status(&self) -> TurnStatus {
        self.status
    }
    /// Why the turn aborted, when it did.
    #[must_use]
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }
    /// Hex proof digest.
    #[must_use]
    pub fn proof(&self) -> &str {
        &self.proof
    }
    /// Convenience: did the turn seal cleanly?
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.status == TurnStatus::Sealed
    }
}
