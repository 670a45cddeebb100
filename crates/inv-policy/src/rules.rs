// SPDX-License-Identifier: MIT OR Apache-2.0
//! Policy document schema and compiled rule matchers.

use inv_core::BoundaryError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The only policy document version this engine understands.
pub const POLICY_VERSION: u32 = 1;

/// A policy document as loaded from disk.
///
/// Policies are data; the engine stays logic-agnostic. Any deterministic,
/// pure predicate family can be added behind the same three gates later.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyDocument {
    /// Schema version; must equal [`POLICY_VERSION`].
    pub version: u32,
    /// The rule list. Empty means "admit everything".
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One rule in a policy document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    /// How `value` is interpreted.
    pub kind: RuleKind,
    /// Pattern text.
    pub value: String,
    /// Which gate the rule applies at.
    pub scope: RuleScope,
    /// What a match does.
    pub action: RuleAction,
}

/// Pattern interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Case-insensitive regular expression.
    Regex,
    /// Case-insensitive literal substring.
    Substring,
}

/// Which predicate a rule feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Whole-input pre-check (`admit`).
    Input,
    /// Per-token check (`inspect`), matched across token boundaries.
    Token,
    /// Whole-output post-check (`finalize`).
    Output,
}

impl RuleScope {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Token => "token",
            Self::Output => "output",
        }
    }
}

/// Effect of a matching rule. Only denial exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Deny the turn at the rule's scope.
    Deny,
}

/// A rule compiled to a matcher.
#[derive(Debug)]
pub(crate) struct CompiledRule {
    matcher: Matcher,
    kind: RuleKind,
    value: String,
    scope: RuleScope,
}

#[derive(Debug)]
enum Matcher {
    Substring(String),
    Regex(regex::Regex),
}

impl CompiledRule {
    pub(crate) fn compile(policy_name: &str, rule: &Rule) -> Result<Self, BoundaryError> {
        let matcher = match rule.kind {
            RuleKind::Substring => Matcher::Substring(rule.value.to_lowercase()),
            RuleKind::Regex => {
                let re = regex::RegexBuilder::new(&rule.value)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| BoundaryError::PolicyLoad {
                        name: policy_name.to_string(),
                        reason: format!("invalid regex '{}': {e}", rule.value),
                    })?;
                Matcher::Regex(re)
            }
        };
        Ok(Self {
            matcher,
            kind: rule.kind,
            value: rule.value.clone(),
            scope: rule.scope,
        })
    }

    pub(crate) fn is_match(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(needle) => text.to_lowercase().contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(text),
        }
    }

    pub(crate) fn scope(&self) -> RuleScope {
        self.scope
    }

    /// Pattern length in characters; sizes the rolling token window.
    pub(crate) fn pattern_chars(&self) -> usize {
        self.value.chars().count()
    }

    /// Human-readable citation used as an abort reason.
    pub(crate) fn describe(&self) -> String {
        let kind = match self.kind {
            RuleKind::Regex => "regex",
            RuleKind::Substring => "substring",
        };
        format!(
            "rule denied: {kind} '{}' (scope: {})",
            self.value,
            self.scope.as_str()
        )
    }
}
