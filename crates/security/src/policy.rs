//! Gate policies: which actors may perform which actions.
//!
//! Rules pair an actor pattern with an action pattern. A pattern is `"*"`
//! (anything), a prefix ending in `*` (e.g. `"worker-*"`), or an exact name.

use colony_config::{GateConfig, GateRule};
use colony_core::{ActionGate, GateDecision};

/// Allows everything. The default when no policy is configured.
pub struct AllowAllGate;

impl ActionGate for AllowAllGate {
    fn check_allowed(&self, _actor_id: &str, _action_name: &str) -> GateDecision {
        GateDecision::allow()
    }
}

/// Rule-based gate.
///
/// Rules:
/// - A matching `deny` rule always wins
/// - Otherwise a matching `allow` rule allows
/// - Otherwise `default_allow` decides
#[derive(Debug, Clone)]
pub struct PolicyGate {
    default_allow: bool,
    allow: Vec<GateRule>,
    deny: Vec<GateRule>,
}

impl PolicyGate {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            default_allow: config.default_allow,
            allow: config.allow.clone(),
            deny: config.deny.clone(),
        }
    }

    /// Deny everything not explicitly allowed.
    pub fn deny_by_default() -> Self {
        Self { default_allow: false, allow: Vec::new(), deny: Vec::new() }
    }

    pub fn allow(mut self, actor: impl Into<String>, action: impl Into<String>) -> Self {
        self.allow.push(GateRule { actor: actor.into(), action: action.into(), reason: None });
        self
    }

    pub fn deny(mut self, actor: impl Into<String>, action: impl Into<String>, reason: impl Into<String>) -> Self {
        self.deny.push(GateRule {
            actor: actor.into(),
            action: action.into(),
            reason: Some(reason.into()),
        });
        self
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

fn rule_matches(rule: &GateRule, actor_id: &str, action_name: &str) -> bool {
    pattern_matches(&rule.actor, actor_id) && pattern_matches(&rule.action, action_name)
}

impl ActionGate for PolicyGate {
    fn check_allowed(&self, actor_id: &str, action_name: &str) -> GateDecision {
        if let Some(rule) = self.deny.iter().find(|r| rule_matches(r, actor_id, action_name)) {
            return GateDecision::deny(rule.reason.clone().unwrap_or_else(|| {
                format!("'{action_name}' denied for '{actor_id}' by policy")
            }));
        }

        if self.allow.iter().any(|r| rule_matches(r, actor_id, action_name)) {
            return GateDecision::allow();
        }

        if self.default_allow {
            GateDecision::allow()
        } else {
            GateDecision::deny(format!(
                "'{action_name}' not allowed for '{actor_id}' ({} allow rules configured)",
                self.allow.len()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows() {
        assert!(AllowAllGate.check_allowed("anyone", "spawn_worker").allowed);
    }

    #[test]
    fn default_policy_allows() {
        let gate = PolicyGate::default();
        assert!(gate.check_allowed("supervisor", "spawn_worker").allowed);
    }

    #[test]
    fn deny_rule_wins_over_allow() {
        let gate = PolicyGate::deny_by_default()
            .allow("*", "store_experience")
            .deny("quarantine-*", "store_experience", "worker is untrusted");

        assert!(gate.check_allowed("w-1", "store_experience").allowed);
        let decision = gate.check_allowed("quarantine-7", "store_experience");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "worker is untrusted");
    }

    #[test]
    fn deny_by_default_explains_itself() {
        let gate = PolicyGate::deny_by_default();
        let decision = gate.check_allowed("supervisor", "spawn_worker");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("spawn_worker"));
    }

    #[test]
    fn exact_patterns_do_not_prefix_match() {
        let gate = PolicyGate::default().deny("supervisor", "spawn", "no");
        assert!(gate.check_allowed("supervisor", "spawn_worker").allowed);
        assert!(!gate.check_allowed("supervisor", "spawn").allowed);
    }

    #[test]
    fn rules_from_config() {
        let config = GateConfig {
            default_allow: true,
            allow: Vec::new(),
            deny: vec![GateRule {
                actor: "*".into(),
                action: "spawn_worker".into(),
                reason: None,
            }],
        };
        let decision = PolicyGate::from_config(&config).check_allowed("supervisor", "spawn_worker");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("denied"));
    }
}
