//! Tenant + project configuration records and the read-only config store.
//!
//! One [`TenantRecord`] exists per `(company_id, project_id)` pair. The engine
//! never writes these rows; onboarding tooling owns them. The ingress performs
//! exactly one [`ConfigStore::fetch`] per request and snapshots the relevant
//! parts into the Context Object so the processor never has to read the store
//! again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use tokio::sync::RwLock;

use crate::courier::channel::ChannelMethod;

/// Whether a project may initiate conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Inactive,
}

/// Static configuration for one delivery channel of one tenant project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Reference string resolved against the secret store for provider
    /// credentials.
    pub credentials_reference: String,
    /// Sender identity presented to the recipient: the tenant's WhatsApp/SMS
    /// number or from-address.
    pub sender_identity: String,
    /// Template variable slots the assistant reply must fill. Empty means
    /// "accept any non-empty variable object".
    #[serde(default)]
    pub template_variables: Vec<String>,
    /// Channel-specific static fields carried through verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// LLM assistant configuration for one tenant project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Reference string resolved against the secret store for the LLM API
    /// key.
    pub api_key_reference: String,
    /// Assistant identifiers keyed by channel wire name.
    pub assistant_ids: HashMap<String, String>,
}

impl AiConfig {
    /// The assistant id configured for `channel`, if any.
    pub fn assistant_for(&self, channel: ChannelMethod) -> Option<&str> {
        self.assistant_ids.get(channel.as_str()).map(|s| s.as_str())
    }
}

/// Optional rate-limit hints; advisory only, the engine does not enforce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub daily_quota: Option<u32>,
}

/// Per-channel configuration blocks. A missing block means the channel is not
/// provisioned for this project even if listed in `allowed_channels`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelBlocks {
    #[serde(default)]
    pub whatsapp: Option<ChannelConfig>,
    #[serde(default)]
    pub sms: Option<ChannelConfig>,
    #[serde(default)]
    pub email: Option<ChannelConfig>,
}

/// One tenant + project configuration row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub company_id: String,
    pub project_id: String,
    pub project_status: ProjectStatus,
    /// Channel wire names this project may use.
    pub allowed_channels: Vec<String>,
    #[serde(default)]
    pub channels: ChannelBlocks,
    pub ai_config: AiConfig,
    /// Free-form tenant representative block, echoed into state for the reply
    /// pipeline.
    #[serde(default)]
    pub company_reps: Option<Value>,
    #[serde(default)]
    pub rate_limits: Option<RateLimits>,
}

impl TenantRecord {
    /// Whether `channel` is in the allowed set.
    pub fn allows(&self, channel: ChannelMethod) -> bool {
        self.allowed_channels.iter().any(|c| c == channel.as_str())
    }

    /// The configuration block for `channel`, if provisioned.
    pub fn channel_config(&self, channel: ChannelMethod) -> Option<&ChannelConfig> {
        match channel {
            ChannelMethod::Whatsapp => self.channels.whatsapp.as_ref(),
            ChannelMethod::Sms => self.channels.sms.as_ref(),
            ChannelMethod::Email => self.channels.email.as_ref(),
        }
    }
}

/// Transport-level failure talking to the config store.
#[derive(Debug)]
pub struct ConfigStoreError(pub String);

impl fmt::Display for ConfigStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config store error: {}", self.0)
    }
}

impl Error for ConfigStoreError {}

/// Read-only keyed lookup of tenant configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the row for `(company_id, project_id)`. `Ok(None)` means the row
    /// does not exist; `Err` is a transport failure.
    async fn fetch(
        &self,
        company_id: &str,
        project_id: &str,
    ) -> Result<Option<TenantRecord>, ConfigStoreError>;
}

/// In-memory config store used by the local stack and the test suite.
pub struct InMemoryConfigStore {
    rows: RwLock<HashMap<(String, String), TenantRecord>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a row, keyed by its own identity fields.
    pub async fn insert(&self, record: TenantRecord) {
        let key = (record.company_id.clone(), record.project_id.clone());
        self.rows.write().await.insert(key, record);
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn fetch(
        &self,
        company_id: &str,
        project_id: &str,
    ) -> Result<Option<TenantRecord>, ConfigStoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(company_id.to_string(), project_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_record() -> TenantRecord {
        serde_json::from_value(json!({
            "company_id": "ci-aaa-001",
            "project_id": "pi-aaa-001",
            "project_status": "active",
            "allowed_channels": ["whatsapp", "email"],
            "channels": {
                "whatsapp": {
                    "credentials_reference": "secrets/ci-aaa-001/twilio",
                    "sender_identity": "+15550001111",
                    "template_variables": ["first_name", "body"]
                }
            },
            "ai_config": {
                "api_key_reference": "secrets/ci-aaa-001/llm",
                "assistant_ids": {"whatsapp": "asst_abc123"}
            },
            "company_reps": {"account_manager": "Sam"}
        }))
        .unwrap()
    }

    #[test]
    fn channel_lookup_and_allow_list() {
        let record = sample_record();
        assert!(record.allows(ChannelMethod::Whatsapp));
        assert!(record.allows(ChannelMethod::Email));
        assert!(!record.allows(ChannelMethod::Sms));
        assert!(record.channel_config(ChannelMethod::Whatsapp).is_some());
        assert!(record.channel_config(ChannelMethod::Email).is_none());
    }

    #[test]
    fn assistant_resolution_is_per_channel() {
        let record = sample_record();
        assert_eq!(
            record.ai_config.assistant_for(ChannelMethod::Whatsapp),
            Some("asst_abc123")
        );
        assert_eq!(record.ai_config.assistant_for(ChannelMethod::Sms), None);
    }

    #[tokio::test]
    async fn fetch_returns_none_for_unknown_rows() {
        let store = InMemoryConfigStore::new();
        store.insert(sample_record()).await;
        assert!(store
            .fetch("ci-aaa-001", "pi-aaa-001")
            .await
            .unwrap()
            .is_some());
        assert!(store.fetch("ci-zzz", "pi-zzz").await.unwrap().is_none());
    }
}
