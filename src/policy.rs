//! Static issuance policy.
//!
//! A [`PolicyRules`] value is built once at startup (built-in default or a YAML
//! file) and handed to [`PolicyEngine::new`]. The engine is pure: no I/O, no
//! interior state, so the same ruleset can be evaluated from any task.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::Rejection;
use crate::models::credential::CredentialRequest;

// ── Ruleset ──────────────────────────────────────────────────

/// Declarative ruleset. Field names follow the on-disk YAML layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRules {
    pub allowed_types: Vec<String>,
    pub api_key: KeyRules,
    pub quotas: QuotaRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyRules {
    pub min_length: i64,
    #[serde(default = "default_max_length")]
    pub max_length: i64,
    pub ttl_max_seconds: i64,
    /// Scope rules that force a request into `pending`. A trailing `*` marks a prefix rule.
    #[serde(default)]
    pub require_approval_scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaRules {
    pub max_active_per_principal: usize,
}

fn default_max_length() -> i64 {
    512
}

/// Hard ceiling on `ttl_max_seconds`: ten years.
pub const TTL_CEILING_SECONDS: i64 = 10 * 365 * 86_400;

/// Hard ceiling on `max_length`. Lengths are persisted as INT.
pub const LENGTH_CEILING: i64 = 4096;

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            allowed_types: vec!["api_key".to_string()],
            api_key: KeyRules {
                min_length: 32,
                max_length: default_max_length(),
                ttl_max_seconds: 86_400,
                require_approval_scopes: vec!["admin".to_string(), "write:*".to_string()],
            },
            quotas: QuotaRules {
                max_active_per_principal: 5,
            },
        }
    }
}

impl PolicyRules {
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let rules: PolicyRules = serde_yaml::from_str(text).context("invalid policy YAML")?;
        rules.check()?;
        Ok(rules)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject rulesets that could never issue anything sensible.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.allowed_types.is_empty() {
            anyhow::bail!("policy: allowed_types must not be empty");
        }
        if self.api_key.min_length < 1 {
            anyhow::bail!("policy: api_key.min_length must be at least 1");
        }
        if self.api_key.max_length < self.api_key.min_length {
            anyhow::bail!(
                "policy: api_key.max_length ({}) is below min_length ({})",
                self.api_key.max_length,
                self.api_key.min_length
            );
        }
        if self.api_key.max_length > LENGTH_CEILING {
            anyhow::bail!(
                "policy: api_key.max_length ({}) exceeds the ceiling of {}",
                self.api_key.max_length,
                LENGTH_CEILING
            );
        }
        if self.api_key.ttl_max_seconds < 1 {
            anyhow::bail!("policy: api_key.ttl_max_seconds must be positive");
        }
        if self.api_key.ttl_max_seconds > TTL_CEILING_SECONDS {
            anyhow::bail!(
                "policy: api_key.ttl_max_seconds ({}) exceeds the ceiling of {}",
                self.api_key.ttl_max_seconds,
                TTL_CEILING_SECONDS
            );
        }
        if self.quotas.max_active_per_principal < 1 {
            anyhow::bail!("policy: quotas.max_active_per_principal must be at least 1");
        }
        Ok(())
    }
}

// ── Approval rules ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalRule {
    Exact(String),
    /// Stores the literal prefix (without the trailing `*`) and the rule as declared.
    Prefix { prefix: String, declared: String },
}

impl ApprovalRule {
    pub fn parse(rule: &str) -> Self {
        match rule.strip_suffix('*') {
            Some(prefix) => ApprovalRule::Prefix {
                prefix: prefix.to_string(),
                declared: rule.to_string(),
            },
            None => ApprovalRule::Exact(rule.to_string()),
        }
    }

    pub fn matches(&self, scope: &str) -> bool {
        match self {
            ApprovalRule::Exact(rule) => scope == rule,
            ApprovalRule::Prefix { prefix, .. } => scope.starts_with(prefix.as_str()),
        }
    }

    pub fn reason_code(&self) -> String {
        match self {
            ApprovalRule::Exact(rule) => format!("needs_approval_exact_{}", rule),
            ApprovalRule::Prefix { declared, .. } => format!("needs_approval_prefix_{}", declared),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    NotRequired,
    Required { scope: String, rule: ApprovalRule },
}

impl ApprovalDecision {
    pub fn is_required(&self) -> bool {
        matches!(self, ApprovalDecision::Required { .. })
    }

    pub fn reason_code(&self) -> String {
        match self {
            ApprovalDecision::NotRequired => "ok".to_string(),
            ApprovalDecision::Required { rule, .. } => rule.reason_code(),
        }
    }
}

// ── Engine ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: PolicyRules,
    approval_rules: Vec<ApprovalRule>,
}

impl PolicyEngine {
    pub fn new(rules: PolicyRules) -> Self {
        let approval_rules = rules
            .api_key
            .require_approval_scopes
            .iter()
            .map(|r| ApprovalRule::parse(r))
            .collect();
        Self {
            rules,
            approval_rules,
        }
    }

    pub fn rules(&self) -> &PolicyRules {
        &self.rules
    }

    /// Type used when a request does not name one.
    pub fn default_kind(&self) -> &str {
        self.rules
            .allowed_types
            .first()
            .map(String::as_str)
            .unwrap_or("api_key")
    }

    pub fn max_active_per_principal(&self) -> usize {
        self.rules.quotas.max_active_per_principal
    }

    /// Shape and limit checks. Reports only the first failure.
    pub fn validate_request(&self, req: &CredentialRequest) -> Result<(), Rejection> {
        let limits = &self.rules.api_key;

        if !self.rules.allowed_types.iter().any(|t| *t == req.kind) {
            return Err(Rejection::TypeNotAllowed);
        }
        if req.length < limits.min_length {
            return Err(Rejection::LengthTooShort);
        }
        // ceilings also bind rulesets built in code, which skip `check`
        if req.ttl_seconds > limits.ttl_max_seconds.min(TTL_CEILING_SECONDS) {
            return Err(Rejection::TtlTooLong);
        }
        if req.ttl_seconds <= 0 {
            return Err(Rejection::TtlTooShort);
        }
        if req.length > limits.max_length.min(LENGTH_CEILING) {
            return Err(Rejection::LengthTooLong);
        }
        Ok(())
    }

    /// First (scope, rule) match wins, scopes outer, rules inner.
    pub fn requires_approval(&self, scopes: &[String]) -> ApprovalDecision {
        for scope in scopes {
            for rule in &self.approval_rules {
                if rule.matches(scope) {
                    return ApprovalDecision::Required {
                        scope: scope.clone(),
                        rule: rule.clone(),
                    };
                }
            }
        }
        ApprovalDecision::NotRequired
    }
}
