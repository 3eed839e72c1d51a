use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::domain::connector::{ConnectorCredentials, ConnectorType};
use crate::domain::run::TenantId;

/// Read side of per-tenant connector secrets.
pub trait CredentialVault: Send + Sync {
    fn credentials(
        &self,
        tenant_id: &TenantId,
        connector_type: ConnectorType,
    ) -> Option<ConnectorCredentials>;
}

#[derive(Default)]
pub struct InMemoryCredentialVault {
    entries: RwLock<HashMap<(TenantId, ConnectorType), ConnectorCredentials>>,
}

impl InMemoryCredentialVault {
    /// Replaces whatever the tenant previously stored for the same connector.
    pub fn store(&self, credentials: ConnectorCredentials) {
        let key = (credentials.tenant_id.clone(), credentials.connector_type);
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key, credentials);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, credentials);
            }
        }
    }

    pub fn revoke(&self, tenant_id: &TenantId, connector_type: ConnectorType) -> bool {
        let key = (tenant_id.clone(), connector_type);
        match self.entries.write() {
            Ok(mut entries) => entries.remove(&key).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&key).is_some(),
        }
    }
}

impl fmt::Debug for InMemoryCredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault for InMemoryCredentialVault {
    fn credentials(
        &self,
        tenant_id: &TenantId,
        connector_type: ConnectorType,
    ) -> Option<ConnectorCredentials> {
        let key = (tenant_id.clone(), connector_type);
        match self.entries.read() {
            Ok(entries) => entries.get(&key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
        }
    }
}
