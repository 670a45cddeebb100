// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-core
//!
//! The stable contract for Invariant: the frozen value types that describe a
//! generation turn, the [`ExecutionGraph`] that binds them, and the [`Turn`]
//! that seals the result.
//!
//! Every entity here is immutable after construction. Constructors perform
//! total-field validation and are the only way to obtain a value; there are
//! no public fields and no setters. If you only take one dependency, take
//! this one.

/// Boundary runtime configuration and `INVARIANT_*` environment loading.
pub mod config;
/// Error taxonomy shared by the boundary and its backends.
pub mod error;
/// The immutable execution graph and its canonical identity.
pub mod graph;
/// Sealed turn results and the proof formula.
pub mod turn;

pub use config::BoundaryConfig;
pub use error::{BackendError, BoundaryError};
pub use graph::{ExecutionGraph, PolicyRef};
pub use turn::{Turn, TurnStatus, compute_proof};

use serde::Serialize;
use std::collections::BTreeMap;

/// Engine version embedded in every receipt's `meta.engine_version`.
///
/// Replay treats a mismatch as drift, so this only moves with releases.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The identity on whose behalf a turn executes.
///
/// All four fields are mandatory and non-empty; anonymous execution is
/// refused at construction.
///
/// # Examples
///
/// ```
/// use inv_core::Identity;
///
/// let id = Identity::new("u1", "admin", "acme", "prod").unwrap();
/// assert_eq!(id.user_id(), "u1");
/// assert!(Identity::new("u1", "", "acme", "prod").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    user_id: String,
    role: String,
    org: String,
    env: String,
}

impl Identity {
    /// Construct an identity, refusing any empty field.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] if any field is empty.
    pub fn new(
        user_id: impl Into<String>,
        role: impl Into<String>,
        org: impl Into<String>,
        env: impl Into<String>,
    ) -> Result<Self, BoundaryError> {
        let identity = Self {
            user_id: user_id.into(),
            role: role.into(),
            org: org.into(),
            env: env.into(),
        };
        for (field, value) in [
            ("user_id", &identity.user_id),
            ("role", &identity.role),
            ("org", &identity.org),
            ("env", &identity.env),
        ] {
            if value.is_empty() {
                return Err(BoundaryError::Input(format!(
                    "identity field '{field}' must not be empty"
                )));
            }
        }
        Ok(identity)
    }

    /// The requesting user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
    /// The requesting role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }
    /// The requesting organisation.
    #[must_use]
    pub fn org(&self) -> &str {
        &self.org
    }
    /// The execution environment (e.g. `"prod"`).
    #[must_use]
    pub fn env(&self) -> &str {
        &self.env
    }
}

/// A scalar value allowed in [`ModelSpec`] extra parameters.
///
/// Floats are deliberately unrepresentable: they never reach a proof's
/// canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A string parameter.
    Str(String),
    /// An integer parameter.
    Int(i64),
    /// A boolean parameter.
    Bool(bool),
}

impl ParamValue {
    /// JSON rendering used by the canonical encoder.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}
impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}
impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// The declared model configuration a turn runs under.
///
/// This is the *declared* configuration: the backend must honour it or the
/// proof is meaningless. `seed` is required (zero is a valid seed; absence
/// is a construction error by signature).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    provider: String,
    name: String,
    version: String,
    seed: i64,
    decoding_strategy: String,
    extra_params: BTreeMap<String, ParamValue>,
}

impl ModelSpec {
    /// Construct a model spec, refusing empty base fields.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] if `provider`, `name`, `version`,
    /// or `decoding_strategy` is empty.
    pub fn new(
        provider: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        seed: i64,
        decoding_strategy: impl Into<String>,
        extra_params: BTreeMap<String, ParamValue>,
    ) -> Result<Self, BoundaryError> {
        let spec = Self {
            provider: provider.into(),
            name: name.into(),
            version: version.into(),
            seed,
            decoding_strategy: decoding_strategy.into(),
            extra_params,
        };
        for (field, value) in [
            ("provider", &spec.provider),
            ("name", &spec.name),
            ("version", &spec.version),
            ("decoding_strategy", &spec.decoding_strategy),
        ] {
            if value.is_empty() {
                return Err(BoundaryError::Input(format!(
                    "model spec field '{field}' must not be empty"
                )));
            }
        }
        Ok(spec)
    }

    /// Backend provider id (e.g. `"mock"`, `"openai"`).
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }
    /// Model name as known to the provider.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Declared model version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
    /// Sampling seed. Zero is valid; absence is not representable.
    #[must_use]
    pub fn seed(&self) -> i64 {
        self.seed
    }
    /// Decoding strategy, e.g. `"greedy"` or `"temperature=0.7"`.
    #[must_use]
    pub fn decoding_strategy(&self) -> &str {
        &self.decoding_strategy
    }
    /// Extra provider parameters.
    #[must_use]
    pub fn extra_params(&self) -> &BTreeMap<String, ParamValue> {
        &self.extra_params
    }
}

/// The kind of a context source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A file on the local filesystem.
    File,
    /// Static content resolved from a path.
    Static,
    /// A retrieved RAG chunk.
    Rag,
    /// Conversation or agent memory.
    Memory,
    /// Output of a tool invocation.
    Tool,
}

impl SourceKind {
    /// Whether the boundary can resolve this kind to a byte stream and hash
    /// it itself. Non-addressable kinds must arrive pre-hashed.
    #[must_use]
    pub fn is_addressable(&self) -> bool {
        matches!(self, Self::File | Self::Static)
    }

    /// Stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Static => "static",
            Self::Rag => "rag",
            Self::Memory => "memory",
            Self::Tool => "tool",
        }
    }

    /// Parse a wire string.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] for unknown kinds.
    pub fn parse(s: &str) -> Result<Self, BoundaryError> {
        match s {
            "file" => Ok(Self::File),
            "static" => Ok(Self::Static),
            "rag" => Ok(Self::Rag),
            "memory" => Ok(Self::Memory),
            "tool" => Ok(Self::Tool),
            other => Err(BoundaryError::Input(format!(
                "unknown context source type '{other}'"
            ))),
        }
    }
}

/// Sensitivity classification of a context source.
///
/// Only three values are meaningful. Anything else parses to [`Unknown`]
/// and is refused at graph construction unless
/// [`BoundaryConfig::allow_unknown_sensitivity`] is set.
///
/// [`Unknown`]: Sensitivity::Unknown
/// [`BoundaryConfig::allow_unknown_sensitivity`]: crate::config::BoundaryConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Publicly shareable.
    Public,
    /// Internal to the organisation.
    Internal,
    /// Restricted distribution.
    Restricted,
    /// Any unrecognised classification.
    Unknown,
}

impl Sensitivity {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Restricted => "restricted",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire string; unrecognised values become [`Sensitivity::Unknown`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "public" => Self::Public,
            "internal" => Self::Internal,
            "restricted" => Self::Restricted,
            _ => Self::Unknown,
        }
    }
}

/// A declared context source.
///
/// `content_hash` may be empty before freezing for addressable kinds
/// (`file`, `static`); the graph constructor resolves and re-hashes those.
/// Non-addressable kinds (`rag`, `memory`, `tool`) must be constructed with
/// a caller-supplied hash — there is no identifier-string fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSource {
    #[serde(rename = "type")]
    kind: SourceKind,
    sensitivity: Sensitivity,
    identifier: String,
    content_hash: String,
}

impl ContextSource {
    /// Declare an addressable source (`file` or `static`) whose content
    /// hash will be computed at freeze time.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] if `kind` is not addressable or
    /// `identifier` is empty.
    pub fn addressable(
        kind: SourceKind,
        sensitivity: Sensitivity,
        identifier: impl Into<String>,
    ) -> Result<Self, BoundaryError> {
        if !kind.is_addressable() {
            return Err(BoundaryError::Input(format!(
                "context source type '{}' requires a caller-supplied content hash",
                kind.as_str()
            )));
        }
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(BoundaryError::Input(
                "context source identifier must not be empty".to_string(),
            ));
        }
        Ok(Self {
            kind,
            sensitivity,
            identifier,
            content_hash: String::new(),
        })
    }

    /// Declare a source whose content hash the caller already knows.
    ///
    /// This is mandatory for non-addressable kinds and also accepted for
    /// addressable ones (the freeze step re-hashes those regardless).
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError::Input`] if `identifier` is empty or
    /// `content_hash` is not a 64-character lower-case hex string.
    pub fn prehashed(
        kind: SourceKind,
        sensitivity: Sensitivity,
        identifier: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Result<Self, BoundaryError> {
        let identifier = identifier.into();
        let content_hash = content_hash.into();
        if identifier.is_empty() {
            return Err(BoundaryError::Input(
                "context source identifier must not be empty".to_string(),
            ));
        }
        if !is_hex_digest(&content_hash) {
            return Err(BoundaryError::Input(format!(
                "context source '{identifier}' content hash must be 64 lower-case hex characters"
            )));
        }
        Ok(Self {
            kind,
            sensitivity,
            identifier,
            content_hash,
        })
    }

    /// Return a copy with the content hash replaced. Crate-internal: only
    /// the freeze step populates hashes.
    pub(crate) fn with_hash(&self, content_hash: String) -> Self {
        Self {
            kind: self.kind,
            sensitivity: self.sensitivity,
            identifier: self.identifier.clone(),
            content_hash,
        }
    }

    /// Source kind.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }
    /// Sensitivity classification.
    #[must_use]
    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }
    /// Path or URI naming the source.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
    /// Hex SHA-256 of the content; empty before freezing.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

/// An ordered declaration of every context source a turn consults.
///
/// Order is input; the canonical encoding removes its effect on the proof.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextSpec {
    sources: Vec<ContextSource>,
}

impl ContextSpec {
    /// Wrap a list of declared sources.
    #[must_use]
    pub fn new(sources: Vec<ContextSource>) -> Self {
        Self { sources }
    }

    /// An empty context.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The declared sources, in declaration order.
    #[must_use]
    pub fn sources(&self) -> &[ContextSource] {
        &self.sources
    }

    /// Whether every source carries a content hash.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.sources.iter().all(|s| !s.content_hash.is_empty())
    }

    /// Resolve and hash every addressable source against the live
    /// filesystem, returning a fully hashed copy.
    ///
    /// # Errors
    ///
    /// - [`BoundaryError::Input`] for an `unknown` sensitivity (unless
    ///   `allow_unknown_sensitivity`) or a non-addressable source that
    ///   arrived without a hash
    /// - [`BoundaryError::ContextResolution`] when a file cannot be read
    pub fn freeze(&self, allow_unknown_sensitivity: bool) -> Result<Self, BoundaryError> {
        let mut frozen = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if source.sensitivity == Sensitivity::Unknown && !allow_unknown_sensitivity {
                return Err(BoundaryError::Input(format!(
                    "context source '{}' has an unknown sensitivity",
                    source.identifier
                )));
            }
            if source.kind.is_addressable() {
                let digest = inv_canon::digest_file_hex(std::path::Path::new(&source.identifier))
                    .map_err(|e| BoundaryError::ContextResolution {
                        identifier: source.identifier.clone(),
                        source: e,
                    })?;
                frozen.push(source.with_hash(digest));
            } else {
                if source.content_hash.is_empty() {
                    return Err(BoundaryError::Input(format!(
                        "non-addressable context source '{}' has no content hash",
                        source.identifier
                    )));
                }
                frozen.push(source.clone());
            }
        }
        Ok(Self { sources: frozen })
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
