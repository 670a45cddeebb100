// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios over the public API: clean sealing, input denial,
//! mid-stream veto, context order-invariance, drift detection, and input
//! validation.

use inv_api::{
    BoundaryConfig, BoundaryError, ContextSource, ContextSpec, Identity, Invariant, ModelSpec,
    ReplayOptions, Sensitivity, SourceKind, TurnStatus, VerificationResult,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

struct Fixture {
    dir: tempfile::TempDir,
    invariant: Invariant,
}

impl Fixture {
    fn with_policy(policy_json: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("safety.json"), policy_json).unwrap();
        let invariant =
            Invariant::new(BoundaryConfig::default().with_policy_dir(dir.path())).unwrap();
        Self { dir, invariant }
    }

    fn empty_policy() -> Self {
        Self::with_policy(r#"{"version":1,"rules":[]}"#)
    }

    fn write_context_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn identity() -> Identity {
    Identity::new("u1", "admin", "acme", "prod").unwrap()
}

fn mock_model(seed: i64) -> ModelSpec {
    ModelSpec::new("mock", "m", "v1", seed, "greedy", BTreeMap::new()).unwrap()
}

fn file_source(path: &PathBuf) -> ContextSource {
    ContextSource::addressable(
        SourceKind::File,
        Sensitivity::Public,
        path.display().to_string(),
    )
    .unwrap()
}

// S1: empty policy, mock backend, seed 40 → response table row 0, sealed.
#[tokio::test]
async fn s1_clean_turn_seals_deterministically() {
    let f = Fixture::empty_policy();
    let turn = f
        .invariant
        .execute("Hello", identity(), mock_model(40), ContextSpec::empty(), "safety")
        .await
        .unwrap();

    assert_eq!(turn.status(), TurnStatus::Sealed);
    assert_eq!(turn.output(), "This is a deterministic response A.");

    let again = f
        .invariant
        .execute("Hello", identity(), mock_model(40), ContextSpec::empty(), "safety")
        .await
        .unwrap();
    assert_eq!(turn.proof(), again.proof());
    assert_eq!(turn.graph().id(), again.graph().id());
}

// S2: input-scope substring rule denies before any token is drawn.
#[tokio::test]
async fn s2_input_rule_denies_mixed_case_payload() {
    let f = Fixture::with_policy(
        r#"{"version":1,"rules":[{"kind":"substring","value":"drop table","scope":"input","action":"deny"}]}"#,
    );
    let turn = f
        .invariant
        .execute(
            "Please DrOp TaBlE users",
            identity(),
            mock_model(40),
            ContextSpec::empty(),
            "safety",
        )
        .await
        .unwrap();

    assert_eq!(turn.status(), TurnStatus::Aborted);
    assert!(turn.output().is_empty());
    assert!(turn.abort_reason().unwrap().contains("drop table"));
}

// S3: token-scope rule vetoes the completing token; the accepted prefix
// survives into the sealed result.
#[tokio::test]
async fn s3_token_rule_vetoes_mid_stream() {
    let f = Fixture::with_policy(
        r#"{"version":1,"rules":[{"kind":"substring","value":"response","scope":"token","action":"deny"}]}"#,
    );
    let turn = f
        .invariant
        .execute("Hello", identity(), mock_model(40), ContextSpec::empty(), "safety")
        .await
        .unwrap();

    assert_eq!(turn.status(), TurnStatus::Aborted);
    assert_eq!(turn.output(), "This is a deterministic ");
    assert!(!turn.output().contains("response"));
    assert!(turn.abort_reason().unwrap().contains("response"));
}

// S4: context declaration order must not affect the proof.
#[tokio::test]
async fn s4_context_order_is_proof_invariant() {
    let f = Fixture::empty_policy();
    let a = f.write_context_file("a.txt", "alpha content");
    let b = f.write_context_file("b.txt", "beta content");

    let forward = f
        .invariant
        .execute(
            "Hello",
            identity(),
            mock_model(40),
            ContextSpec::new(vec![file_source(&a), file_source(&b)]),
            "safety",
        )
        .await
        .unwrap();
    let backward = f
        .invariant
        .execute(
            "Hello",
            identity(),
            mock_model(40),
            ContextSpec::new(vec![file_source(&b), file_source(&a)]),
            "safety",
        )
        .await
        .unwrap();

    assert_eq!(forward.proof(), backward.proof());
}

// S5: overwrite a referenced context file after sealing → replay reports
// drift on that source's content hash.
#[tokio::test]
async fn s5_context_rot_is_reported_as_drift() {
    let f = Fixture::empty_policy();
    let ctx = f.write_context_file("ctx.txt", "v1");

    let turn = f
        .invariant
        .execute(
            "Hello",
            identity(),
            mock_model(40),
            ContextSpec::new(vec![file_source(&ctx)]),
            "safety",
        )
        .await
        .unwrap();

    let receipt_path = f.dir.path().join("receipt.json");
    f.invariant.save_receipt(&turn, &receipt_path).unwrap();

    // Unchanged environment first: replay verifies.
    let verdict = f
        .invariant
        .verify_path(&receipt_path, &ReplayOptions::default())
        .await
        .unwrap();
    assert_eq!(verdict, VerificationResult::Verified);

    std::fs::write(&ctx, "v2").unwrap();

    let verdict = f
        .invariant
        .verify_path(&receipt_path, &ReplayOptions::default())
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
        VerificationResult::Verified => panic!("expected drift after context rot"),
    }
}

// S6: anonymous identities are refused at construction, before anything
// else can happen.
#[test]
fn s6_empty_identity_field_is_an_input_error() {
    let err = Identity::new("u1", "", "acme", "prod").unwrap_err();
    assert!(matches!(err, BoundaryError::Input(_)));
}

// Property 5: every emitted receipt's signature verifies against its own
// public key.
#[tokio::test]
async fn emitted_receipts_are_signature_self_consistent() {
    let f = Fixture::empty_policy();
    let turn = f
        .invariant
        .execute("Hello", identity(), mock_model(3), ContextSpec::empty(), "safety")
        .await
        .unwrap();

    let receipt = f.invariant.receipt_for(&turn);
    assert!(receipt.verify_proof_signature().unwrap());
    assert_eq!(
        receipt.integrity.signatures[0].pub_key,
        f.invariant.node_public_key()
    );
}

// Aborted turns also seal and verify: the receipt records the reason and
// the truncated output, and replay reproduces the same aborted proof.
#[tokio::test]
async fn aborted_turns_replay_to_the_same_proof() {
    let f = Fixture::with_policy(
        r#"{"version":1,"rules":[{"kind":"substring","value":"response","scope":"token","action":"deny"}]}"#,
    );
    let turn = f
        .invariant
        .execute("Hello", identity(), mock_model(40), ContextSpec::empty(), "safety")
        .await
        .unwrap();
    assert_eq!(turn.status(), TurnStatus::Aborted);

    let path = f.dir.path().join("aborted.json");
    f.invariant.save_receipt(&turn, &path).unwrap();

    let verdict = f
        .invariant
        .verify_path(&path, &ReplayOptions::default())
        .await
        .unwrap();
    assert_eq!(verdict, VerificationResult::Verified);
}

// Different seeds pick different response table rows and different proofs.
#[tokio::test]
async fn seed_changes_output_and_proof() {
    let f = Fixture::empty_policy();
    let a = f
        .invariant
        .execute("Hello", identity(), mock_model(0), ContextSpec::empty(), "safety")
        .await
        .unwrap();
    let b = f
        .invariant
        .execute("Hello", identity(), mock_model(1), ContextSpec::empty(), "safety")
        .await
        .unwrap();

    assert_ne!(a.output(), b.output());
    assert_ne!(a.proof(), b.proof());
}

// Policy rot: editing the policy file after sealing surfaces as drift on
// the policy hash, even when this turn's behaviour would not change.
#[tokio::test]
async fn policy_rot_is_reported_as_drift() {
    let f = Fixture::empty_policy();
    let turn = f
        .invariant
        .execute("Hello", identity(), mock_model(40), ContextSpec::empty(), "safety")
        .await
        .unwrap();
    let path = f.dir.path().join("receipt.json");
    f.invariant.save_receipt(&turn, &path).unwrap();

    std::fs::write(
        f.dir.path().join("safety.json"),
        r#"{"version":1,"rules":[{"kind":"substring","value":"zzz","scope":"input","action":"deny"}]}"#,
    )
    .unwrap();

    let verdict = f
        .invariant
        .verify_path(&path, &ReplayOptions::default())
        .await
        .unwrap();
    match verdict {
        VerificationResult::Drift(report) => {
            assert_eq!(report.field.to_string(), "graph.policy_sha256");
        }
        VerificationResult::Verified => panic!("expected drift after policy edit"),
    }
}
