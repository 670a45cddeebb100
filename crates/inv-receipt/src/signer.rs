// SPDX-License-Identifier: MIT OR Apache-2.0
//! The node keypair.
//!
//! One Ed25519 keypair per process, constructed once at startup and never
//! mutated afterwards. The receipt carries the public key, so signatures
//! verify without a key registry.

use crate::ReceiptError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use tracing::info;

/// A process-wide Ed25519 signing identity.
pub struct NodeKey {
    signing: SigningKey,
}

impl NodeKey {
    /// Generate an ephemeral key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a key from a 64-character hex seed.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Key`] if the seed is not 32 bytes of hex.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, ReceiptError> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| ReceiptError::Key(format!("node key seed is not hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ReceiptError::Key("node key seed must be 32 bytes".to_string()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Load a persisted seed from `path`, or generate an ephemeral key when
    /// no path is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::Key`] if the configured file is unreadable
    /// or malformed. A configured-but-broken key store never silently falls
    /// back to an ephemeral key.
    pub fn load_or_generate(path: Option<&Path>) -> Result<Self, ReceiptError> {
        match path {
            Some(p) => {
                let seed = std::fs::read_to_string(p).map_err(|e| {
                    ReceiptError::Key(format!("cannot read node key '{}': {e}", p.display()))
                })?;
                let key = Self::from_seed_hex(&seed)?;
                info!(
                    target: "inv.receipt",
                    pub_key = %&key.public_key_hex()[..16],
                    "node key loaded from store"
                );
                Ok(key)
            }
            None => {
                let key = Self::generate();
                info!(
                    target: "inv.receipt",
                    pub_key = %&key.public_key_hex()[..16],
                    "ephemeral node key generated"
                );
                Ok(key)
            }
        }
    }

    /// Hex-encoded public key.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    /// Sign a message, returning the hex signature.
    #[must_use]
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private material.
        f.debug_struct("NodeKey")
            .field("pub_key", &self.public_key_hex())
            .finish()
    }
}

/// Verify a detached hex signature against a hex public key.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify;
/// malformed keys or signatures are errors.
///
/// # Errors
///
/// Returns [`ReceiptError::Signature`] if the key or signature bytes are
/// malformed.
pub fn verify_signature(
    pub_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<bool, ReceiptError> {
    let key_bytes: [u8; 32] = hex::decode(pub_key_hex)
        .map_err(|e| ReceiptError::Signature(format!("public key is not hex: {e}")))?
        .try_into()
        .map_err(|_| ReceiptError::Signature("public key must be 32 bytes".to_string()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| ReceiptError::Signature(format!("invalid public key: {e}")))?;

    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| ReceiptError::Signature(format!("signature is not hex: {e}")))?
        .try_into()
        .map_err(|_| ReceiptError::Signature("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    Ok(key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = NodeKey::generate();
        let sig = key.sign_hex(b"proof");
        assert!(verify_signature(&key.public_key_hex(), b"proof", &sig).unwrap());
    }

    #[test]
    fn wrong_message_does_not_verify() {
        let key = NodeKey::generate();
        let sig = key.sign_hex(b"proof");
        assert!(!verify_signature(&key.public_key_hex(), b"other", &sig).unwrap());
    }

    #[test]
    fn malformed_inputs_are_errors_not_false() {
        let key = NodeKey::generate();
        let sig = key.sign_hex(b"proof");
        assert!(verify_signature("nothex", b"proof", &sig).is_err());
        assert!(verify_signature(&key.public_key_hex(), b"proof", "beef").is_err());
    }

    #[test]
    fn seed_roundtrip_is_deterministic() {
        let seed = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
        let a = NodeKey::from_seed_hex(seed).unwrap();
        let b = NodeKey::from_seed_hex(seed).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        // Same key, same message, same (deterministic) Ed25519 signature.
        assert_eq!(a.sign_hex(b"m"), b.sign_hex(b"m"));
    }

    #[test]
    fn from_seed_rejects_bad_lengths() {
        assert!(NodeKey::from_seed_hex("beef").is_err());
        assert!(NodeKey::from_seed_hex("zz").is_err());
    }

    #[test]
    fn load_or_generate_reads_persisted_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        std::fs::write(
            &path,
            "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60\n",
        )
        .unwrap();

        let a = NodeKey::load_or_generate(Some(&path)).unwrap();
        let b = NodeKey::load_or_generate(Some(&path)).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn missing_key_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NodeKey::load_or_generate(Some(&dir.path().join("absent"))).is_err());
    }

    #[test]
    fn debug_hides_private_material() {
        let key = NodeKey::generate();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("pub_key"));
        assert!(!dbg.contains("signing"));
    }
}
