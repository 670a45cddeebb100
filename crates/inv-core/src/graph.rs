// SPDX-License-Identifier: MIT OR Apache-2.0
//! The immutable execution graph.
//!
//! An [`ExecutionGraph`] is the sealed record of what a turn was *asked* to
//! do: identity, input, policy reference, model configuration, and the fully
//! hashed context. Its `id` is a pure function of the canonical encoding, so
//! two graphs with equal encodings agree on `id` across processes and hosts.

use crate::{BoundaryError, ContextSpec, Identity, ModelSpec};
use serde::Serialize;
use serde_json::{Value, json};

/// A frozen reference to the policy in force: logical name plus the SHA-256
/// of the policy document's bytes.
///
/// The content hash participates in the graph id. Binding only the name
/// could not detect a policy text change that leaves one particular turn's
/// behaviour intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyRef {
    name: String,
    sha256: String,
}

impl PolicyRef {
    /// Construct a policy reference.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] if the name is empty or the hash is
    /// not 64 lower-case hex characters.
    pub fn new(name: impl Into<String>, sha256: impl Into<String>) -> Result<Self, BoundaryError> {
        let name = name.into();
        let sha256 = sha256.into();
        if name.is_empty() {
            return Err(BoundaryError::Input(
                "policy name must not be empty".to_string(),
            ));
        }
        if sha256.len() != 64
            || !sha256
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(BoundaryError::Input(format!(
                "policy '{name}' content hash must be 64 lower-case hex characters"
            )));
        }
        Ok(Self { name, sha256 })
    }

    /// Logical policy name or path.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Hex SHA-256 of the policy document bytes.
    #[must_use]
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

/// The immutable record of a planned execution. This is what gets sealed
/// and proved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionGraph {
    identity: Identity,
    input_payload: String,
    policy: PolicyRef,
    model: ModelSpec,
    context: ContextSpec,
    id: String,
}

impl ExecutionGraph {
    /// Assemble and seal a graph from already-frozen parts.
    ///
    /// The context must be fully hashed (see [`ContextSpec::freeze`]); a
    /// source with an empty content hash means it was unresolvable and the
    /// graph is refused.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] for an unhashed source, or
    /// [`BoundaryError::Canon`] if canonical encoding fails.
    pub fn seal(
        identity: Identity,
        input_payload: impl Into<String>,
        policy: PolicyRef,
        model: ModelSpec,
        context: ContextSpec,
    ) -> Result<Self, BoundaryError> {
        if let Some(unresolved) = context.sources().iter().find(|s| s.content_hash().is_empty()) {
            return Err(BoundaryError::Input(format!(
                "context source '{}' surfaced without a content hash",
                unresolved.identifier()
            )));
        }

        let mut graph = Self {
            identity,
            input_payload: input_payload.into(),
            policy,
            model,
            context,
            id: String::new(),
        };
        graph.id = inv_canon::digest_value_hex(&graph.canonical_value())?;
        Ok(graph)
    }

    /// The canonical structured encoding this graph's id is computed over.
    ///
    /// Context sources are rewritten into canonical order — sorted by
    /// `(identifier, content_hash)` — so the proof is invariant to their
    /// declaration order.
    #[must_use]
    pub fn canonical_value(&self) -> Value {
        let mut sources: Vec<_> = self.context.sources().iter().collect();
        sources.sort_by(|a, b| {
            (a.identifier(), a.content_hash()).cmp(&(b.identifier(), b.content_hash()))
        });
        let sources: Vec<Value> = sources
            .into_iter()
            .map(|s| {
                json!({
                    "type": s.kind().as_str(),
                    "sensitivity": s.sensitivity().as_str(),
                    "identifier": s.identifier(),
                    "content_hash": s.content_hash(),
                })
            })
            .collect();

        let extra: serde_json::Map<String, Value> = self
            .model
            .extra_params()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        json!({
            "identity": {
                "user_id": self.identity.user_id(),
                "role": self.identity.role(),
                "org": self.identity.org(),
                "env": self.identity.env(),
            },
            "input_payload": self.input_payload,
            "policy": {
                "name": self.policy.name(),
                "sha256": self.policy.sha256(),
            },
            "model": {
                "provider": self.model.provider(),
                "name": self.model.name(),
                "version": self.model.version(),
                "seed": self.model.seed(),
                "decoding_strategy": self.model.decoding_strategy(),
                "extra_params": extra,
            },
            "context": { "sources": sources },
        })
    }

    /// Deterministic hex id of the canonical encoding.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
    /// The requesting identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
    /// The raw input prompt.
    #[must_use]
    pub fn input_payload(&self) -> &str {
        &self.input_payload
    }
    /// The frozen policy reference.
    #[must_use]
    pub fn policy(&self) -> &PolicyRef {
        &self.policy
    }
    /// The declared model configuration.
    #[must_use]
    pub fn model(&self) -> &ModelSpec {
        &self.model
    }
    /// The frozen context, in declaration order.
    #[must_use]
    pub fn context(&self) -> &ContextSpec {
        &self.context
    }
}
