//! Connector directory: which integrations exist, which agents need them, and whether a
//! tenant has supplied the credentials those integrations require.

pub mod catalog;
pub mod vault;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

pub use catalog::CatalogError;
pub use vault::{CredentialVault, InMemoryCredentialVault};

use crate::domain::agent::{AgentDefinition, AgentKey};
use crate::domain::connector::{Connector, ConnectorType};
use crate::domain::run::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialGap {
    pub connector_type: ConnectorType,
    pub missing_keys: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessSummary {
    pub total: usize,
    pub fully_supported: usize,
    pub partially_supported: usize,
    pub ready: Vec<AgentKey>,
    pub pending: Vec<AgentKey>,
}

/// Immutable snapshot of the capability catalog. Built once and shared behind an `Arc`.
#[derive(Clone, Debug)]
pub struct ConnectorDirectory {
    connectors: HashMap<ConnectorType, Connector>,
    agents: Vec<AgentDefinition>,
    index: HashMap<String, usize>,
}

impl ConnectorDirectory {
    /// Builds a directory, rejecting duplicate declarations and agents that reference a
    /// connector the catalog never declares.
    pub fn new(
        connectors: Vec<Connector>,
        agents: Vec<AgentDefinition>,
    ) -> Result<Self, CatalogError> {
        let mut connector_map = HashMap::with_capacity(connectors.len());
        for connector in connectors {
            let connector_type = connector.connector_type;
            if connector_map.insert(connector_type, connector).is_some() {
                return Err(CatalogError::DuplicateConnector(connector_type));
            }
        }

        let mut index = HashMap::with_capacity(agents.len());
        for (position, agent) in agents.iter().enumerate() {
            if index.insert(agent.key.0.clone(), position).is_some() {
                return Err(CatalogError::DuplicateAgent(agent.key.0.clone()));
            }
            if let Some(undeclared) = agent
                .required_connectors
                .iter()
                .find(|connector_type| !connector_map.contains_key(connector_type))
            {
                return Err(CatalogError::UndeclaredConnector {
                    agent_key: agent.key.0.clone(),
                    connector_type: *undeclared,
                });
            }
        }

        Ok(Self { connectors: connector_map, agents, index })
    }

    pub fn builtin() -> Self {
        let connectors: HashMap<ConnectorType, Connector> = catalog::builtin_connectors()
            .into_iter()
            .map(|connector| (connector.connector_type, connector))
            .collect();
        let agents = catalog::builtin_agents();
        let index =
            agents.iter().enumerate().map(|(position, agent)| (agent.key.0.clone(), position)).collect();

        Self { connectors, agents, index }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file = catalog::parse_catalog(raw)?;
        Self::new(file.connectors, file.agents)
    }

    pub fn from_catalog_file(path: &Path) -> Result<Self, CatalogError> {
        let file = catalog::read_catalog(path)?;
        let directory = Self::new(file.connectors, file.agents)?;
        info!(
            event_name = "catalog.loaded",
            path = %path.display(),
            agents = directory.agents.len(),
            connectors = directory.connectors.len(),
            "loaded catalog file"
        );
        Ok(directory)
    }

    /// Uses the catalog file when one is configured, the built-in table otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => Self::from_catalog_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn agent(&self, agent_key: &str) -> Option<&AgentDefinition> {
        self.index.get(agent_key).map(|position| &self.agents[*position])
    }

    pub fn agents(&self) -> &[AgentDefinition] {
        &self.agents
    }

    pub fn connector(&self, connector_type: ConnectorType) -> Option<&Connector> {
        self.connectors.get(&connector_type)
    }

    pub fn is_known_agent(&self, agent_key: &str) -> bool {
        self.index.contains_key(agent_key)
    }

    /// Connectors an agent needs, in declared order. Unknown agents need nothing.
    pub fn connectors_for(&self, agent_key: &str) -> Vec<&Connector> {
        self.agent(agent_key)
            .map(|agent| {
                agent
                    .required_connectors
                    .iter()
                    .filter_map(|connector_type| self.connectors.get(connector_type))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn missing_connectors(&self, agent_key: &str) -> Vec<ConnectorType> {
        let Some(agent) = self.agent(agent_key) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        agent
            .required_connectors
            .iter()
            .filter(|connector_type| seen.insert(**connector_type))
            .filter(|connector_type| {
                !self.connectors.get(connector_type).is_some_and(|connector| connector.available)
            })
            .copied()
            .collect()
    }

    pub fn is_fully_supported(&self, agent_key: &str) -> bool {
        self.missing_connectors(agent_key).is_empty()
    }

    pub fn fully_supported_agents(&self) -> Vec<&AgentDefinition> {
        self.agents.iter().filter(|agent| self.is_fully_supported(agent.key.as_str())).collect()
    }

    pub fn readiness_summary(&self) -> ReadinessSummary {
        let mut summary = ReadinessSummary { total: self.agents.len(), ..ReadinessSummary::default() };

        for agent in &self.agents {
            if self.is_fully_supported(agent.key.as_str()) {
                summary.ready.push(agent.key.clone());
            } else {
                summary.pending.push(agent.key.clone());
            }
        }
        summary.fully_supported = summary.ready.len();
        summary.partially_supported = summary.pending.len();
        summary
    }

    /// Credential keys `tenant_id` has not supplied for the agent's connectors. Expired
    /// credentials count as absent.
    pub fn missing_credentials(
        &self,
        agent_key: &str,
        tenant_id: &TenantId,
        vault: &dyn CredentialVault,
        now: DateTime<Utc>,
    ) -> Vec<CredentialGap> {
        let mut seen = HashSet::new();
        let mut gaps = Vec::new();

        for connector in self.connectors_for(agent_key) {
            if connector.required_credential_keys.is_empty()
                || !seen.insert(connector.connector_type)
            {
                continue;
            }

            let missing_keys = match vault.credentials(tenant_id, connector.connector_type) {
                Some(credentials) if !credentials.is_expired(now) => {
                    credentials.missing_keys(connector)
                }
                _ => connector.required_credential_keys.iter().cloned().collect(),
            };

            if !missing_keys.is_empty() {
                gaps.push(CredentialGap { connector_type: connector.connector_type, missing_keys });
            }
        }

        gaps
    }
}
