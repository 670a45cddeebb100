// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-replay
//!
//! Replay verification: parse a receipt, rebuild its inputs from the live
//! environment, re-execute the boundary, and compare proofs.
//!
//! Recorded content hashes are *not* trusted for addressable sources: the
//! replay forces re-hashing from disk, so any byte change in a referenced
//! file surfaces as drift. Non-addressable sources (`rag`, `memory`,
//! `tool`) have no live bytes to re-hash; their recorded hashes carry over.

use inv_boundary::ExecutionBoundary;
use inv_core::{
    BoundaryError, ContextSource, ContextSpec, Identity, ModelSpec, ParamValue, PolicyRef,
    SourceKind, Sensitivity, compute_proof,
};
use inv_receipt::{ModelRecord, Receipt, ReceiptError};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Outcome of verifying a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// Replay reproduced the recorded proof in an unchanged environment.
    Verified,
    /// Something drifted; the report names the first divergent field.
    Drift(DriftReport),
}

/// The first divergence found while verifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    /// Which field diverged first.
    pub field: DriftField,
    /// The value the receipt recorded.
    pub recorded: String,
    /// The value observed during replay.
    pub observed: String,
}

/// Receipt fields that can diverge, in detection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftField {
    /// The signature does not verify against the recorded proof.
    Signature,
    /// The recorded graph and output do not reproduce the recorded proof
    /// (a tampered receipt).
    RecordedProof,
    /// The verifying engine differs from the sealing engine.
    EngineVersion,
    /// The policy document bytes changed.
    PolicySha256,
    /// A context source's live content hash changed.
    ContextHash {
        /// Index into `graph.context.sources`.
        index: usize,
        /// Identifier of the drifted source.
        identifier: String,
    },
    /// The declared model configuration diverged.
    Model,
    /// Re-execution produced different output.
    Output,
    /// The final proof comparison failed.
    Proof,
}

impl std::fmt::Display for DriftField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signature => f.write_str("integrity.signatures"),
            Self::RecordedProof | Self::Proof => f.write_str("meta.proof_id"),
            Self::EngineVersion => f.write_str("meta.engine_version"),
            Self::PolicySha256 => f.write_str("graph.policy_sha256"),
            Self::ContextHash { index, .. } => {
                write!(f, "graph.context.sources[{index}].content_hash")
            }
            Self::Model => f.write_str("graph.model"),
            Self::Output => f.write_str("result.output"),
        }
    }
}

/// Replay configuration.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Allow replays that contact a live remote backend. Proofs over
    /// non-deterministic backends may legitimately fail to re-verify; that
    /// is drift and gets reported, never papered over.
    pub contact_remote: bool,
}

/// Errors that prevent a verdict (distinct from drift, which *is* one).
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The receipt could not be read or parsed.
    #[error("receipt error")]
    Receipt(#[from] ReceiptError),

    /// Re-execution failed fatally (policy missing, backend down, …).
    #[error("replay execution failed")]
    Boundary(#[from] BoundaryError),

    /// The receipt names a remote provider and `contact_remote` is off.
    #[error("refusing to replay against remote provider '{provider}' without contact_remote")]
    RemoteReplayDisabled {
        /// Provider recorded in the receipt.
        provider: String,
    },
}

/// Verify a parsed receipt against the live environment.
///
/// Detection order: signature, recorded-proof consistency, engine version,
/// then a full re-execution with per-field attribution (policy hash,
/// context hashes, model, output), and finally the proof comparison.
///
/// # Errors
///
/// Returns [`VerifyError`] when no verdict can be reached; a reachable
/// verdict is always `Ok` (either variant of [`VerificationResult`]).
pub async fn verify(
    receipt: &Receipt,
    boundary: &ExecutionBoundary,
    options: &ReplayOptions,
) -> Result<VerificationResult, VerifyError> {
    // 1. Signature over the recorded proof.
    if !receipt.verify_proof_signature()? {
        return drift(
            DriftField::Signature,
            &receipt.meta.proof_id,
            "signature does not verify",
        );
    }

    // 2. Does the recorded graph + output actually reproduce the recorded
    //    proof? Catches receipts edited after signing the proof id alone.
    let recorded_graph = recorded_graph(receipt)?;
    let recorded_proof = compute_proof(
        recorded_graph.id(),
        &receipt.result.output,
        receipt.result.status,
        receipt.result.abort_reason.as_deref(),
    )
    .map_err(BoundaryError::from)?;
    if recorded_proof != receipt.meta.proof_id {
        return drift(DriftField::RecordedProof, &receipt.meta.proof_id, &recorded_proof);
    }

    // 3. Engine version. Not part of the sealed proof, but a version skew
    //    means replay semantics may differ.
    if receipt.meta.engine_version != inv_core::ENGINE_VERSION {
        return drift(
            DriftField::EngineVersion,
            &receipt.meta.engine_version,
            inv_core::ENGINE_VERSION,
        );
    }

    // 4. Remote backends need an explicit opt-in.
    let provider = receipt.graph.model.provider.clone();
    if provider != "mock" && !options.contact_remote {
        return Err(VerifyError::RemoteReplayDisabled { provider });
    }

    // 5. Re-execute against the live environment, re-hashing addressable
    //    sources from disk.
    let identity = identity_from_record(receipt)?;
    let model = model_from_record(&receipt.graph.model)?;
    let raw_context = raw_context_from_record(receipt)?;

    debug!(target: "inv.replay", policy = %receipt.graph.policy_name, "re-executing turn");
    let new_turn = boundary
        .run(
            identity,
            &receipt.graph.input_payload,
            model,
            raw_context,
            &receipt.graph.policy_name,
        )
        .await?;

    // 6. Attribute the first divergence.
    let new_graph = new_turn.graph();
    if new_graph.policy().sha256() != receipt.graph.policy_sha256 {
        return drift(
            DriftField::PolicySha256,
            &receipt.graph.policy_sha256,
            new_graph.policy().sha256(),
        );
    }
    for (index, (live, recorded)) in new_graph
        .context()
        .sources()
        .iter()
        .zip(&receipt.graph.context.sources)
        .enumerate()
    {
        if live.content_hash() != recorded.content_hash {
            return Ok(VerificationResult::Drift(DriftReport {
                field: DriftField::ContextHash {
                    index,
                    identifier: recorded.identifier.clone(),
                },
                recorded: recorded.content_hash.clone(),
                observed: live.content_hash().to_string(),
            }));
        }
    }
    let live_model = model_record_of(new_graph.model());
    if live_model != receipt.graph.model {
        return drift(
            DriftField::Model,
            &serde_json::to_string(&receipt.graph.model).unwrap_or_default(),
            &serde_json::to_string(&live_model).unwrap_or_default(),
        );
    }
    if new_turn.output() != receipt.result.output {
        return drift(DriftField::Output, &receipt.result.output, new_turn.output());
    }

    // 7. Final word: the proof itself.
    if new_turn.proof() != receipt.meta.proof_id {
        return drift(DriftField::Proof, &receipt.meta.proof_id, new_turn.proof());
    }

    info!(target: "inv.replay", proof = %receipt.meta.proof_id, "replay verified");
    Ok(VerificationResult::Verified)
}

fn drift(
    field: DriftField,
    recorded: &str,
    observed: &str,
) -> Result<VerificationResult, VerifyError> {
    Ok(VerificationResult::Drift(DriftReport {
        field,
        recorded: recorded.to_string(),
        observed: observed.to_string(),
    }))
}

fn identity_from_record(receipt: &Receipt) -> Result<Identity, BoundaryError> {
    let id = &receipt.graph.identity;
    Identity::new(&id.user_id, &id.role, &id.org, &id.env)
}

fn model_from_record(record: &ModelRecord) -> Result<ModelSpec, BoundaryError> {
    let mut extra = BTreeMap::new();
    for (key, value) in &record.extra_params {
        let param = match value {
            serde_json::Value::String(s) => ParamValue::Str(s.clone()),
            serde_json::Value::Bool(b) => ParamValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => {
                    return Err(BoundaryError::Input(format!(
                        "extra parameter '{key}' is not an integer scalar"
                    )));
                }
            },
            _ => {
                return Err(BoundaryError::Input(format!(
                    "extra parameter '{key}' is not a scalar"
                )));
            }
        };
        extra.insert(key.clone(), param);
    }
    ModelSpec::new(
        &record.provider,
        &record.name,
        &record.version,
        record.seed,
        &record.decoding_strategy,
        extra,
    )
}

/// Rebuild the graph exactly as recorded, trusting recorded hashes. Used
/// only to recompute the recorded proof.
fn recorded_graph(receipt: &Receipt) -> Result<inv_core::ExecutionGraph, BoundaryError> {
    let mut sources = Vec::with_capacity(receipt.graph.context.sources.len());
    for record in &receipt.graph.context.sources {
        let kind = SourceKind::parse(&record.kind)?;
        sources.push(ContextSource::prehashed(
            kind,
            Sensitivity::parse(&record.sensitivity),
            &record.identifier,
            &record.content_hash,
        )?);
    }
    inv_core::ExecutionGraph::seal(
        identity_from_record(receipt)?,
        &receipt.graph.input_payload,
        PolicyRef::new(&receipt.graph.policy_name, &receipt.graph.policy_sha256)?,
        model_from_record(&receipt.graph.model)?,
        ContextSpec::new(sources),
    )
}

/// Rebuild the *raw* context for re-execution: addressable sources lose
/// their recorded hashes so the freeze step re-hashes from disk.
fn raw_context_from_record(receipt: &Receipt) -> Result<ContextSpec, BoundaryError> {
    let mut sources = Vec::with_capacity(receipt.graph.context.sources.len());
    for record in &receipt.graph.context.sources {
        let kind = SourceKind::parse(&record.kind)?;
        let sensitivity = Sensitivity::parse(&record.sensitivity);
        let source = if kind.is_addressable() {
            ContextSource::addressable(kind, sensitivity, &record.identifier)?
        } else {
            ContextSource::prehashed(kind, sensitivity, &record.identifier, &record.content_hash)?
        };
        sources.push(source);
    }
    Ok(ContextSpec::new(sources))
}

fn model_record_of(model: &ModelSpec) -> ModelRecord {
    ModelRecord {
        provider: model.provider().to_string(),
        name: model.name().to_string(),
        version: model.version().to_string(),
        seed: model.seed(),
        decoding_strategy: model.decoding_strategy().to_string(),
        extra_params: model
            .extra_params()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inv_backend_core::BackendRegistry;
    use inv_backend_mock::MockBackend;
    use inv_core::BoundaryConfig;
    use inv_receipt::NodeKey;
    use std::sync::Arc;

    struct Fixture {
        dir: tempfile::TempDir,
        boundary: ExecutionBoundary,
        key: NodeKey,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("safety.json"),
            r#"{"version":1,"rules":[]}"#,
        )
        .unwrap();

        let mut backends = BackendRegistry::new();
        backends.register(MockBackend);

        let boundary = ExecutionBoundary::new(
            BoundaryConfig::default().with_policy_dir(dir.path()),
            Arc::new(backends),
        );
        Fixture {
            dir,
            boundary,
            key: NodeKey::generate(),
        }
    }

    async fn execute_with_context(f: &Fixture, sources: Vec<ContextSource>) -> Receipt {
        let turn = f
            .boundary
            .run(
                Identity::new("u1", "admin", "acme", "prod").unwrap(),
                "Hello",
                ModelSpec::new("mock", "m", "v1", 40, "greedy", BTreeMap::new()).unwrap(),
                ContextSpec::new(sources),
                "safety",
            )
            .await
            .unwrap();
        Receipt::from_turn(&turn, &f.key, Utc::now())
    }

    #[tokio::test]
    async fn unchanged_environment_verifies() {
        let f = fixture();
        let receipt = execute_with_context(&f, vec![]).await;
        let verdict = verify(&receipt, &f.boundary, &ReplayOptions::default())
            .await
            .unwrap();
        assert_eq!(verdict, VerificationResult::Verified);
    }

    #[tokio::test]
    async fn changed_context_file_is_hash_drift() {
        let f = fixture();
        let ctx_path = f.dir.path().join("ctx.txt");
        std::fs::write(&ctx_path, "v1").unwrap();

        let source = ContextSource::addressable(
            SourceKind::File,
            Sensitivity::Public,
            ctx_path.display().to_string(),
        )
        .unwrap();
        let receipt = execute_with_context(&f, vec![source]).await;

        std::fs::write(&ctx_path, "v2").unwrap();

        let verdict = verify(&receipt, &f.boundary, &ReplayOptions::default())
            .await
            .unwrap();
        match verdict {
            VerificationResult::Drift(report) => {
                assert_eq!(
                    report.field.to_string(),
                    "graph.context.sources[0].content_hash"
                );
                assert_eq!(report.recorded, inv_canon::sha256_hex(b"v1"));
                assert_eq!(report.observed, inv_canon::sha256_hex(b"v2"));
            }
            VerificationResult::Verified => panic!("expected drift"),
        }
    }

    #[tokio::test]
    async fn changed_policy_bytes_are_policy_drift() {
        let f = fixture();
        let receipt = execute_with_context(&f, vec![]).await;

        std::fs::write(
            f.dir.path().join("safety.json"),
            r#"{"version":1,"rules":[{"kind":"substring","value":"x","scope":"output","action":"deny"}]}"#,
        )
        .unwrap();

        let verdict = verify(&receipt, &f.boundary, &ReplayOptions::default())
            .await
            .unwrap();
        match verdict {
            VerificationResult::Drift(report) => {
                assert_eq!(report.field, DriftField::PolicySha256);
            }
            VerificationResult::Verified => panic!("expected drift"),
        }
    }

    #[tokio::test]
    async fn tampered_output_fails_proof_recomputation() {
        let f = fixture();
        let mut receipt = execute_with_context(&f, vec![]).await;
        receipt.result.output.push_str(" tampered");

        let verdict = verify(&receipt, &f.boundary, &ReplayOptions::default())
            .await
            .unwrap();
        match verdict {
            VerificationResult::Drift(report) => {
                assert_eq!(report.field, DriftField::RecordedProof);
            }
            VerificationResult::Verified => panic!("expected drift"),
        }
    }

    #[tokio::test]
    async fn tampered_proof_id_fails_the_signature() {
        let f = fixture();
        let mut receipt = execute_with_context(&f, vec![]).await;
        receipt.meta.proof_id = "0".repeat(64);

        let verdict = verify(&receipt, &f.boundary, &ReplayOptions::default())
            .await
            .unwrap();
        match verdict {
            VerificationResult::Drift(report) => {
                assert_eq!(report.field, DriftField::Signature);
            }
            VerificationResult::Verified => panic!("expected drift"),
        }
    }

    #[tokio::test]
    async fn engine_version_skew_is_drift() {
        let f = fixture();
        let mut receipt = execute_with_context(&f, vec![]).await;
        receipt.meta.engine_version = "0.0.0-other".to_string();
        // Re-sign nothing: version is outside the proof, so only the
        // version check should fire.
        let verdict = verify(&receipt, &f.boundary, &ReplayOptions::default())
            .await
            .unwrap();
        match verdict {
            VerificationResult::Drift(report) => {
                assert_eq!(report.field, DriftField::EngineVersion);
            }
            VerificationResult::Verified => panic!("expected drift"),
        }
    }

    // A deterministic stand-in registered under a remote provider id, so a
    // consistent receipt can name a non-mock provider.
    struct FakeRemote;

    #[async_trait::async_trait]
    impl inv_backend_core::ModelBackend for FakeRemote {
        fn provider(&self) -> &str {
            "openai"
        }
        async fn generate(
            &self,
            prompt: &str,
            spec: &ModelSpec,
        ) -> Result<inv_backend_core::BoxTokenStream, inv_core::BackendError> {
            MockBackend.generate(prompt, spec).await
        }
    }

    #[tokio::test]
    async fn remote_replay_requires_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("safety.json"), r#"{"version":1,"rules":[]}"#).unwrap();

        let mut backends = BackendRegistry::new();
        backends.register(FakeRemote);
        let boundary = ExecutionBoundary::new(
            BoundaryConfig::default().with_policy_dir(dir.path()),
            Arc::new(backends),
        );

        let turn = boundary
            .run(
                Identity::new("u1", "admin", "acme", "prod").unwrap(),
                "Hello",
                ModelSpec::new("openai", "m", "v1", 40, "greedy", BTreeMap::new()).unwrap(),
                ContextSpec::empty(),
                "safety",
            )
            .await
            .unwrap();
        let receipt = Receipt::from_turn(&turn, &NodeKey::generate(), Utc::now());

        let err = verify(&receipt, &boundary, &ReplayOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::RemoteReplayDisabled { .. }));

        // With the opt-in, the deterministic stand-in replays cleanly.
        let verdict = verify(
            &receipt,
            &boundary,
            &ReplayOptions {
                contact_remote: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(verdict, VerificationResult::Verified);
    }

    #[test]
    fn drift_fields_render_receipt_paths() {
        assert_eq!(DriftField::PolicySha256.to_string(), "graph.policy_sha256");
        assert_eq!(
            DriftField::ContextHash {
                index: 2,
                identifier: "x".into()
            }
            .to_string(),
            "graph.context.sources[2].content_hash"
        );
        assert_eq!(DriftField::Output.to_string(), "result.output");
        assert_eq!(DriftField::EngineVersion.to_string(), "meta.engine_version");
    }

    #[test]
    fn float_extra_params_are_rejected() {
        let record = ModelRecord {
            provider: "mock".into(),
            name: "m".into(),
            version: "v1".into(),
            seed: 0,
            decoding_strategy: "greedy".into(),
            extra_params: [("temperature".to_string(), serde_json::json!(0.7))]
                .into_iter()
                .collect(),
        };
        assert!(matches!(
            model_from_record(&record),
            Err(BoundaryError::Input(_))
        ));
    }
}
