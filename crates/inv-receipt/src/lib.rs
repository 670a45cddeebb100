// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-receipt
//!
//! The `invariant.receipt.v1` envelope: graph record, result, proof id, and
//! an Ed25519 signature over the proof.
//!
//! Receipts are emitted through an explicit canonicaliser (keys sorted,
//! two-space indentation, UTF-8, trailing newline), never by serialising
//! in-memory objects directly. The on-disk form is stable across hosts.

/// Ed25519 node keypair and detached signature verification.
pub mod signer;

pub use signer::{NodeKey, verify_signature};

use chrono::{DateTime, SecondsFormat, Utc};
use inv_core::{Turn, TurnStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Schema tag of the one receipt version this crate understands.
pub const RECEIPT_SCHEMA: &str = "invariant.receipt.v1";

/// Errors from receipt serialisation, parsing, or key handling.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    /// JSON (de)serialisation failed.
    #[error("receipt JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Receipt file I/O failed.
    #[error("receipt I/O error at '{path}'")]
    Io {
        /// File being read or written.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document declares a schema this verifier does not understand.
    #[error("unknown receipt schema '{found}' (expected '{RECEIPT_SCHEMA}')")]
    Schema {
        /// Schema string found in the document.
        found: String,
    },

    /// Node key material is missing or malformed.
    #[error("node key error: {0}")]
    Key(String),

    /// Signature or public key bytes are malformed.
    #[error("signature error: {0}")]
    Signature(String),
}

/// On-disk receipt envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Receipt {
    /// Always [`RECEIPT_SCHEMA`].
    pub schema: String,
    /// Engine metadata and the proof id.
    pub meta: ReceiptMeta,
    /// The sealed execution graph.
    pub graph: GraphRecord,
    /// What came out of the turn.
    pub result: ResultRecord,
    /// Signatures binding the proof to the emitting node.
    pub integrity: IntegrityRecord,
}

/// Engine metadata for a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReceiptMeta {
    /// Semver of the engine that sealed the turn.
    pub engine_version: String,
    /// RFC 3339 UTC timestamp with a `Z` suffix.
    pub timestamp: String,
    /// Hex proof digest (64 chars).
    pub proof_id: String,
}

/// Identity as recorded in a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IdentityRecord {
    /// Requesting user id.
    pub user_id: String,
    /// Requesting role.
    pub role: String,
    /// Requesting organisation.
    pub org: String,
    /// Execution environment.
    pub env: String,
}

/// Model configuration as recorded in a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelRecord {
    /// Provider id.
    pub provider: String,
    /// Model name.
    pub name: String,
    /// Declared version.
    pub version: String,
    /// Sampling seed.
    pub seed: i64,
    /// Decoding strategy string.
    pub decoding_strategy: String,
    /// Extra scalar parameters.
    pub extra_params: BTreeMap<String, serde_json::Value>,
}

/// One context source as recorded in a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceRecord {
    /// Source kind (`file`, `static`, `rag`, `memory`, `tool`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Sensitivity classification.
    pub sensitivity: String,
    /// Path or URI.
    pub identifier: String,
    /// Hex SHA-256 of the content at sealing time.
    pub content_hash: String,
}

/// Context block of a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextRecord {
    /// Declared sources, in declaration order.
    pub sources: Vec<SourceRecord>,
}

/// Graph block of a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphRecord {
    /// Requesting identity.
    pub identity: IdentityRecord,
    /// Raw input prompt.
    pub input_payload: String,
    /// Logical policy name or path.
    pub policy_name: String,
    /// Hex SHA-256 of the policy document in force.
    pub policy_sha256: String,
    /// Declared model configuration.
    pub model: ModelRecord,
    /// Declared context.
    pub context: ContextRecord,
}

/// Result block of a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultRecord {
    /// Terminal status.
    pub status: TurnStatus,
    /// Sealed output (the accepted prefix for aborted turns).
    pub output: String,
    /// Abort reason, or `null` for sealed turns.
    pub abort_reason: Option<String>,
}

/// Integrity block of a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntegrityRecord {
    /// Detached signatures. Exactly one today.
    pub signatures: Vec<SignatureRecord>,
}

/// One detached signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SignatureRecord {
    /// Signature algorithm; always `"ed25519"`.
    pub algo: String,
    /// Hex public key of the signing node.
    pub pub_key: String,
    /// Hex signature bytes.
    pub signature: String,
    /// The field the signature covers; always `"meta.proof_id"`.
    pub signed_field: String,
}

impl Receipt {
    /// Build a signed receipt from a sealed turn.
    ///
    /// The signature is Ed25519 over the UTF-8 bytes of the proof hex
    /// string, labelled `signed_field: "meta.proof_id"`.
    #[must_use]
    pub fn from_turn(turn: &Turn, node_key: &NodeKey, timestamp: DateTime<Utc>) -> Self {
        let graph = turn.graph();
        let model = graph.model();
        let extra_params: BTreeMap<String, serde_json::Value> = model
            .extra_params()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        let sources = graph
            .context()
            .sources()
            .iter()
            .map(|s| SourceRecord {
                kind: s.kind().as_str().to_string(),
                sensitivity: s.sensitivity().as_str().to_string(),
                identifier: s.identifier().to_string(),
                content_hash: s.content_hash().to_string(),
            })
            .collect();

        Self {
            schema: RECEIPT_SCHEMA.to_string(),
            meta: ReceiptMeta {
                engine_version: inv_core::ENGINE_VERSION.to_string(),
                timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                proof_id: turn.proof().to_string(),
            },
            graph: GraphRecord {
                identity: IdentityRecord {
                    user_id: graph.identity().user_id().to_string(),
                    role: graph.identity().role().to_string(),
                    org: graph.identity().org().to_string(),
                    env: graph.identity().env().to_string(),
                },
                input_payload: graph.input_payload().to_string(),
                policy_name: graph.policy().name().to_string(),
                policy_sha256: graph.policy().sha256().to_string(),
                model: ModelRecord {
                    provider: model.provider().to_string(),
                    name: model.name().to_string(),
                    version: model.version().to_string(),
                    seed: model.seed(),
                    decoding_strategy: model.decoding_strategy().to_string(),
                    extra_params,
                },
                context: ContextRecord { sources },
            },
            result: ResultRecord {
                status: turn.status(),
                output: turn.output().to_string(),
                abort_reason: turn.abort_reason().map(str::to_string),
            },
            integrity: IntegrityRecord {
                signatures: vec![SignatureRecord {
                    algo: "ed25519".to_string(),
                    pub_key: node_key.public_key_hex(),
                    signature: node_key.sign_hex(turn.proof().as_bytes()),
                    signed_field: "meta.proof_id".to_string(),
                }],
            },
        }
    }

    /// Emit the canonical on-disk form: keys sorted (serde_json maps are
    /// `BTreeMap`s), two-space indentation, trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Json`] if serialisation fails.
    pub fn to_canonical_json(&self) -> Result<String, ReceiptError> {
        let value = serde_json::to_value(self)?;
        let mut out = serde_json::to_string_pretty(&value)?;
        out.push('\n');
        Ok(out)
    }

    /// Parse and schema-check a receipt document.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Json`] for malformed JSON and
    /// [`ReceiptError::Schema`] for an unknown schema tag.
    pub fn from_json(text: &str) -> Result<Self, ReceiptError> {
        let receipt: Self = serde_json::from_str(text)?;
        if receipt.schema != RECEIPT_SCHEMA {
            return Err(ReceiptError::Schema {
                found: receipt.schema,
            });
        }
        Ok(receipt)
    }

    /// Write the canonical form to a file.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Io`] or [`ReceiptError::Json`].
    pub fn write_to(&self, path: &Path) -> Result<(), ReceiptError> {
        let json = self.to_canonical_json()?;
        std::fs::write(path, json).map_err(|source| ReceiptError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read and parse a receipt file.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Io`], [`ReceiptError::Json`], or
    /// [`ReceiptError::Schema`].
    pub fn read_from(path: &Path) -> Result<Self, ReceiptError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReceiptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Verify the first signature against the recorded proof id.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Signature`] if the receipt carries no
    /// ed25519 signature over `meta.proof_id`, or the bytes are malformed.
    pub fn verify_proof_signature(&self) -> Result<bool, ReceiptError> {
        let sig = self
            .integrity
            .signatures
            .iter()
            .find(|s| s.algo == "ed25519" && s.signed_field == "meta.proof_id")
            .ok_or_else(|| {
                ReceiptError::Signature(
                    "receipt carries no ed25519 signature over meta.proof_id".to_string(),
                )
            })?;
        signer::verify_signature(&sig.pub_key, self.meta.proof_id.as_bytes(), &sig.signature)
    }
}
