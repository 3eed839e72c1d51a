use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::domain::run::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectorType {
    #[serde(rename = "github")]
    Github,
    #[serde(rename = "stripe")]
    Stripe,
    #[serde(rename = "supabase")]
    Supabase,
    #[serde(rename = "netlify")]
    Netlify,
    #[serde(rename = "clerk")]
    Clerk,
    #[serde(rename = "chrome-devtools")]
    ChromeDevtools,
    #[serde(rename = "slack")]
    Slack,
    #[serde(rename = "gmail")]
    Gmail,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "notion")]
    Notion,
    #[serde(rename = "pagerduty")]
    Pagerduty,
    #[serde(rename = "macos_automator")]
    MacosAutomator,
}

impl ConnectorType {
    pub const ALL: [ConnectorType; 12] = [
        Self::Github,
        Self::Stripe,
        Self::Supabase,
        Self::Netlify,
        Self::Clerk,
        Self::ChromeDevtools,
        Self::Slack,
        Self::Gmail,
        Self::Google,
        Self::Notion,
        Self::Pagerduty,
        Self::MacosAutomator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Stripe => "stripe",
            Self::Supabase => "supabase",
            Self::Netlify => "netlify",
            Self::Clerk => "clerk",
            Self::ChromeDevtools => "chrome-devtools",
            Self::Slack => "slack",
            Self::Gmail => "gmail",
            Self::Google => "google",
            Self::Notion => "notion",
            Self::Pagerduty => "pagerduty",
            Self::MacosAutomator => "macos_automator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|connector_type| connector_type.as_str() == key)
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static capability entry. `available` tracks whether the integration is wired into the
/// platform at all; per-tenant credentials are a separate concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub connector_type: ConnectorType,
    pub available: bool,
    #[serde(default)]
    pub tool_prefix: Option<String>,
    #[serde(default)]
    pub required_credential_keys: BTreeSet<String>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl Connector {
    pub fn new(connector_type: ConnectorType, available: bool) -> Self {
        Self {
            connector_type,
            available,
            tool_prefix: None,
            required_credential_keys: BTreeSet::new(),
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    pub fn with_credential_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_credential_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }
}

/// Tenant-owned secrets for one connector. Values never show up in `Debug` output.
#[derive(Clone, Debug)]
pub struct ConnectorCredentials {
    pub tenant_id: TenantId,
    pub connector_type: ConnectorType,
    pub credentials: BTreeMap<String, SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectorCredentials {
    pub fn new(tenant_id: TenantId, connector_type: ConnectorType) -> Self {
        Self { tenant_id, connector_type, credentials: BTreeMap::new(), expires_at: None }
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.credentials.insert(key.into(), SecretString::from(value));
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Required keys of `connector` that these credentials do not supply.
    pub fn missing_keys(&self, connector: &Connector) -> Vec<String> {
        connector
            .required_credential_keys
            .iter()
            .filter(|key| !self.credentials.contains_key(key.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Connector, ConnectorCredentials, ConnectorType};
    use crate::domain::run::TenantId;

    #[test]
    fn connector_type_round_trips_from_storage_encoding() {
        for connector_type in ConnectorType::ALL {
            assert_eq!(ConnectorType::parse(connector_type.as_str()), Some(connector_type));
        }
        assert_eq!(ConnectorType::parse("  GitHub "), Some(ConnectorType::Github));
        assert_eq!(ConnectorType::parse("jira"), None);
    }

    #[test]
    fn connector_type_serializes_with_platform_names() {
        let encoded = serde_json::to_string(&ConnectorType::ChromeDevtools).expect("serialize");
        assert_eq!(encoded, "\"chrome-devtools\"");

        let decoded: ConnectorType =
            serde_json::from_str("\"macos_automator\"").expect("deserialize");
        assert_eq!(decoded, ConnectorType::MacosAutomator);
    }

    #[test]
    fn credentials_report_missing_keys_and_hide_secrets() {
        let connector = Connector::new(ConnectorType::Supabase, true)
            .with_credential_keys(["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"]);
        let credentials =
            ConnectorCredentials::new(TenantId("tenant-a".to_string()), ConnectorType::Supabase)
                .with_secret("SUPABASE_URL", "https://example.supabase.co");

        assert_eq!(credentials.missing_keys(&connector), vec!["SUPABASE_SERVICE_ROLE_KEY"]);
        assert!(!format!("{credentials:?}").contains("example.supabase.co"));
    }

    #[test]
    fn credentials_expire_at_their_deadline() {
        let now = Utc::now();
        let credentials =
            ConnectorCredentials::new(TenantId("tenant-a".to_string()), ConnectorType::Github)
                .expiring_at(now - Duration::seconds(1));

        assert!(credentials.is_expired(now));
        assert!(!credentials.clone().expiring_at(now + Duration::hours(1)).is_expired(now));
    }
}
