use agis_core::domain::run::ScopeConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Tool actions a tenant lets an agent perform.
///
/// Entries match an action exactly, or by prefix when they end in `*` (`mcp__github__*`).
/// Denials win over allowances. An empty allow-list allows everything not denied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionPolicy {
    allowed: Vec<String>,
    denied: Vec<String>,
}

impl ActionPolicy {
    pub fn from_scope(scope: Option<&ScopeConfig>) -> Self {
        scope
            .map(|scope| Self {
                allowed: scope.allowed_actions.clone(),
                denied: scope.denied_actions.clone(),
            })
            .unwrap_or_default()
    }

    pub fn evaluate(&self, action: &str) -> GuardrailDecision {
        if let Some(rule) = self.denied.iter().find(|rule| matches_rule(rule, action)) {
            return GuardrailDecision::Deny {
                reason_code: "action_denied",
                user_message: format!("action `{action}` is denied by tenant scope `{rule}`"),
            };
        }

        if !self.allowed.is_empty() && !self.allowed.iter().any(|rule| matches_rule(rule, action))
        {
            return GuardrailDecision::Deny {
                reason_code: "action_not_allowed",
                user_message: format!("action `{action}` is outside the tenant's allowed actions"),
            };
        }

        GuardrailDecision::Allow
    }
}

fn matches_rule(rule: &str, action: &str) -> bool {
    match rule.strip_suffix('*') {
        Some(prefix) => action.starts_with(prefix),
        None => rule == action,
    }
}
