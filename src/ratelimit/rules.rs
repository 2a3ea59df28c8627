//! Limit rules and lookup.
//!
//! Every scope has a default limit. Individual actions may override it, for
//! example a tighter budget for TOTP verification than for plain login.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::key::Scope;
use super::policy::Limit;
use crate::error::{Result, TurnstileError};

/// An override of the scope default for one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRule {
    /// Scope the override applies to
    pub scope: Scope,
    /// Action label to match exactly
    pub action: String,
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl ActionRule {
    /// The limit this rule imposes.
    pub fn limit(&self) -> Limit {
        Limit::new(self.max_attempts, self.window_ms)
    }
}

/// Scope defaults plus per-action overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Default for identity-scoped checks
    #[serde(default = "Limit::identity_default")]
    pub identity: Limit,
    /// Default for address-scoped checks
    #[serde(default = "Limit::address_default")]
    pub address: Limit,
    /// Default for device-scoped checks
    #[serde(default = "Limit::device_default")]
    pub device: Limit,
    /// Per-action overrides
    #[serde(default)]
    pub actions: Vec<ActionRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            identity: Limit::identity_default(),
            address: Limit::address_default(),
            device: Limit::device_default(),
            actions: Vec::new(),
        }
    }
}

impl RuleSet {
    /// Create a rule set with the built-in defaults and no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a rule set from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RuleSet = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Default limit for a scope.
    pub fn scope_default(&self, scope: Scope) -> Limit {
        match scope {
            Scope::Identity => self.identity,
            Scope::Address => self.address,
            Scope::Device => self.device,
        }
    }

    /// Find the limit for an action, falling back to the scope default.
    pub fn find_limit(&self, scope: Scope, action: &str) -> Limit {
        self.actions
            .iter()
            .find(|rule| rule.scope == scope && rule.action == action)
            .map(ActionRule::limit)
            .unwrap_or_else(|| self.scope_default(scope))
    }

    /// Reject zero limits and duplicate overrides.
    pub fn validate(&self) -> Result<()> {
        for (scope, limit) in [
            (Scope::Identity, &self.identity),
            (Scope::Address, &self.address),
            (Scope::Device, &self.device),
        ] {
            check_limit(&format!("{} default", scope), limit)?;
        }

        let mut seen = HashSet::new();
        for rule in &self.actions {
            if rule.action.is_empty() {
                return Err(TurnstileError::Config(format!(
                    "{} override has an empty action",
                    rule.scope
                )));
            }
            if !seen.insert((rule.scope, rule.action.as_str())) {
                return Err(TurnstileError::Config(format!(
                    "duplicate override for {} action '{}'",
                    rule.scope, rule.action
                )));
            }
            check_limit(&format!("{} action '{}'", rule.scope, rule.action), &rule.limit())?;
        }
        Ok(())
    }
}

fn check_limit(name: &str, limit: &Limit) -> Result<()> {
    if limit.max_attempts == 0 {
        return Err(TurnstileError::Config(format!(
            "{}: max_attempts must be greater than zero",
            name
        )));
    }
    if limit.window_ms == 0 {
        return Err(TurnstileError::Config(format!(
            "{}: window_ms must be greater than zero",
            name
        )));
    }
    Ok(())
}
