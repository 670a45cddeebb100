// SPDX-License-Identifier: MIT OR Apache-2.0
//! Boundary configuration.

use crate::BoundaryError;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the policies directory.
pub const POLICY_DIR_ENV: &str = "INVARIANT_POLICY_DIR";
/// Environment variable pointing at a persisted node key seed file.
pub const NODE_KEY_ENV: &str = "INVARIANT_NODE_KEY";
/// Environment variable setting the per-turn deadline in seconds.
pub const DEADLINE_ENV: &str = "INVARIANT_DEADLINE_SECS";

/// Runtime settings for the execution boundary.
#[derive(Debug, Clone)]
pub struct BoundaryConfig {
    /// Directory against which logical policy names resolve.
    pub policy_dir: PathBuf,
    /// Persisted Ed25519 seed file; `None` means an ephemeral key.
    pub node_key_path: Option<PathBuf>,
    /// Overall per-turn deadline. Exceeding it is a synthetic veto.
    pub deadline: Option<Duration>,
    /// Compatibility flag: accept context sources whose sensitivity is not
    /// one of `public` / `internal` / `restricted`.
    pub allow_unknown_sensitivity: bool,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            policy_dir: PathBuf::from("./policies"),
            node_key_path: None,
            deadline: None,
            allow_unknown_sensitivity: false,
        }
    }
}

impl BoundaryConfig {
    /// Build a configuration from `INVARIANT_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] if `INVARIANT_DEADLINE_SECS` is set
    /// but not a positive integer.
    pub fn from_env() -> Result<Self, BoundaryError> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(POLICY_DIR_ENV) {
            config.policy_dir = PathBuf::from(dir);
        }
        if let Ok(key) = std::env::var(NODE_KEY_ENV) {
            config.node_key_path = Some(PathBuf::from(key));
        }
        if let Ok(raw) = std::env::var(DEADLINE_ENV) {
            let secs: u64 = raw.parse().map_err(|_| {
                BoundaryError::Input(format!("{DEADLINE_ENV} must be a positive integer, got '{raw}'"))
            })?;
            if secs == 0 {
                return Err(BoundaryError::Input(format!(
                    "{DEADLINE_ENV} must be a positive integer, got '0'"
                )));
            }
            config.deadline = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Set the policies directory.
    #[must_use]
    pub fn with_policy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.policy_dir = dir.into();
        self
    }

    /// Set the per-turn deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
