use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::connector::ConnectorType;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentKey(pub String);

impl AgentKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentCategory {
    #[serde(rename = "Coding")]
    Coding,
    #[serde(rename = "Admin/Ops")]
    AdminOps,
    #[serde(rename = "Analytics")]
    Analytics,
    #[serde(rename = "Marketing/Creative")]
    MarketingCreative,
}

impl AgentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "Coding",
            Self::AdminOps => "Admin/Ops",
            Self::Analytics => "Analytics",
            Self::MarketingCreative => "Marketing/Creative",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    Webhook,
    Manual,
    Stream,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub key: AgentKey,
    pub name: String,
    pub category: AgentCategory,
    #[serde(default)]
    pub description: String,
    /// Declared order is preserved; readiness reporting relies on it.
    #[serde(default)]
    pub required_connectors: Vec<ConnectorType>,
    #[serde(default)]
    pub triggers: BTreeSet<TriggerKind>,
    #[serde(default)]
    pub kpis: String,
}

impl AgentDefinition {
    pub fn new(key: &str, name: &str, category: AgentCategory) -> Self {
        Self {
            key: AgentKey::from(key),
            name: name.to_string(),
            category,
            description: String::new(),
            required_connectors: Vec::new(),
            triggers: BTreeSet::new(),
            kpis: String::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn requires(mut self, connectors: &[ConnectorType]) -> Self {
        self.required_connectors = connectors.to_vec();
        self
    }

    pub fn triggered_by(mut self, triggers: &[TriggerKind]) -> Self {
        self.triggers = triggers.iter().copied().collect();
        self
    }

    pub fn measured_by(mut self, kpis: &str) -> Self {
        self.kpis = kpis.to_string();
        self
    }
}
