// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-policy
//!
//! Policy compilation and evaluation for the execution boundary.
//!
//! A [`Policy`] compiles a JSON rule list into three deterministic
//! predicates: `admit` (whole input, before any token), `inspect` (per
//! token, matched across token boundaries through a rolling window), and
//! `finalize` (whole output). All three are pure functions of their
//! arguments; an engine that consults wall-clock, randomness, or the
//! network is non-conformant.

/// Policy document schema and compiled matchers.
pub mod rules;

pub use rules::{POLICY_VERSION, PolicyDocument, Rule, RuleAction, RuleKind, RuleScope};

use inv_core::{BoundaryError, PolicyRef};
use rules::CompiledRule;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The outcome of one policy gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    allowed: bool,
    reason: Option<String>,
}

impl Decision {
    /// An allowing decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A denying decision carrying the citation of the rule that fired.
    #[must_use]
    pub fn veto(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    /// Whether the gate passed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// The veto reason, if the gate denied.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// A compiled, immutable policy.
#[derive(Debug)]
pub struct Policy {
    name: String,
    sha256: String,
    input_rules: Vec<CompiledRule>,
    token_rules: Vec<CompiledRule>,
    output_rules: Vec<CompiledRule>,
    token_window: usize,
}

impl Policy {
    /// Compile a policy document from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::PolicyLoad`] for malformed JSON, an
    /// unsupported version, or an uncompilable rule.
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self, BoundaryError> {
        let name = name.into();
        let sha256 = inv_canon::sha256_hex(source.as_bytes());

        let doc: PolicyDocument =
            serde_json::from_str(source).map_err(|e| BoundaryError::PolicyLoad {
                name: name.clone(),
                reason: format!("malformed policy document: {e}"),
            })?;
        if doc.version != POLICY_VERSION {
            return Err(BoundaryError::PolicyLoad {
                name,
                reason: format!(
                    "unsupported policy version {} (expected {POLICY_VERSION})",
                    doc.version
                ),
            });
        }

        let mut input_rules = Vec::new();
        let mut token_rules = Vec::new();
        let mut output_rules = Vec::new();
        for rule in &doc.rules {
            let compiled = CompiledRule::compile(&name, rule)?;
            match compiled.scope() {
                RuleScope::Input => input_rules.push(compiled),
                RuleScope::Token => token_rules.push(compiled),
                RuleScope::Output => output_rules.push(compiled),
            }
        }
        let token_window = token_rules
            .iter()
            .map(CompiledRule::pattern_chars)
            .max()
            .unwrap_or(0);

        Ok(Self {
            name,
            sha256,
            input_rules,
            token_rules,
            output_rules,
            token_window,
        })
    }

    /// Logical name this policy was loaded under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hex SHA-256 of the policy document bytes.
    #[must_use]
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// The frozen reference that binds this policy into a graph.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] only if the name is empty, which
    /// compilation already precludes.
    pub fn policy_ref(&self) -> Result<PolicyRef, BoundaryError> {
        PolicyRef::new(&self.name, &self.sha256)
    }

    /// Whole-input pre-check. Runs once before any token is drawn.
    #[must_use]
    pub fn admit(&self, input_payload: &str) -> Decision {
        for rule in &self.input_rules {
            if rule.is_match(input_payload) {
                return Decision::veto(rule.describe());
            }
        }
        Decision::allow()
    }

    /// Per-token check.
    ///
    /// The candidate token is appended to a rolling window over the tail of
    /// the accepted output, sized by the longest token-scope pattern, so
    /// patterns that straddle token boundaries still match. Any match in
    /// the window necessarily involves the new token: the window without it
    /// was checked when the previous token was admitted.
    #[must_use]
    pub fn inspect(&self, token: &str, running_output: &str) -> Decision {
        if self.token_rules.is_empty() {
            return Decision::allow();
        }
        let window = rolling_window(running_output, token, self.token_window);
        for rule in &self.token_rules {
            if rule.is_match(&window) {
                return Decision::veto(rule.describe());
            }
        }
        Decision::allow()
    }

    /// Whole-output check after the stream ends.
    #[must_use]
    pub fn finalize(&self, full_output: &str) -> Decision {
        for rule in &self.output_rules {
            if rule.is_match(full_output) {
                return Decision::veto(rule.describe());
            }
        }
        Decision::allow()
    }
}

/// Tail of `running` (at most `window - 1` characters) with `token`
/// appended.
fn rolling_window(running: &str, token: &str, window: usize) -> String {
    let keep = window.saturating_sub(1);
    let tail_start = running
        .char_indices()
        .rev()
        .nth(keep.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    let tail = if keep == 0 { "" } else { &running[tail_start..] };
    let mut out = String::with_capacity(tail.len() + token.len());
    out.push_str(tail);
    out.push_str(token);
    out
}

/// Loads and caches compiled policies.
///
/// Logical names resolve against the store's directory as `<name>.json`;
/// anything containing a path separator or ending in `.json` is used as a
/// path directly. Cached entries are immutable — the cache key is
/// `(path, content hash)`, so a changed file loads as a new entry.
#[derive(Debug)]
pub struct PolicyStore {
    dir: PathBuf,
    cache: Mutex<HashMap<(PathBuf, String), Arc<Policy>>>,
}

impl PolicyStore {
    /// Create a store resolving names against `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a logical name to a policy file path.
    #[must_use]
    pub fn resolve(&self, name: &str) -> PathBuf {
        if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') || name.ends_with(".json")
        {
            PathBuf::from(name)
        } else {
            self.dir.join(format!("{name}.json"))
        }
    }

    /// Load (or fetch from cache) the policy behind a logical name.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::PolicyLoad`] if the file is unreadable or
    /// the document does not compile.
    pub fn load(&self, name: &str) -> Result<Arc<Policy>, BoundaryError> {
        let path = self.resolve(name);
        let source =
            std::fs::read_to_string(&path).map_err(|e| BoundaryError::PolicyLoad {
                name: name.to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
        let hash = inv_canon::sha256_hex(source.as_bytes());

        let key = (path.clone(), hash);
        {
            let cache = self.cache.lock().expect("policy cache poisoned");
            if let Some(policy) = cache.get(&key) {
                return Ok(Arc::clone(policy));
            }
        }

        let policy = Arc::new(Policy::compile(name, &source)?);
        debug!(
            target: "inv.policy",
            name = %name,
            path = %path.display(),
            sha256 = %policy.sha256(),
            "compiled policy"
        );
        self.cache
            .lock()
            .expect("policy cache poisoned")
            .insert(key, Arc::clone(&policy));
        Ok(policy)
    }

    /// The directory logical names resolve against.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
