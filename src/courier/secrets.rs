//! Credential blobs and the read-only secret store.
//!
//! Secrets are opaque JSON blobs keyed by reference string. The engine only
//! reads the documented fields of each kind: the LLM key blob, the messaging
//! provider blob (WhatsApp/SMS) and the email provider blob. Reference
//! strings travel inside the Context Object; the blobs themselves never do.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use tokio::sync::RwLock;

use crate::courier::channel::ChannelMethod;

/// Failure while resolving a secret reference.
#[derive(Debug)]
pub enum SecretError {
    /// No blob under the given reference.
    NotFound(String),
    /// The blob exists but does not match the expected shape.
    Malformed { reference: String, detail: String },
    /// Transport-level failure talking to the secret store.
    Transport(String),
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretError::NotFound(reference) => write!(f, "secret not found: {}", reference),
            SecretError::Malformed { reference, detail } => {
                write!(f, "secret {} is malformed: {}", reference, detail)
            }
            SecretError::Transport(detail) => write!(f, "secret store error: {}", detail),
        }
    }
}

impl Error for SecretError {}

/// Keyed lookup of opaque credential blobs.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve a reference string to its JSON blob.
    async fn fetch(&self, reference: &str) -> Result<Value, SecretError>;
}

/// LLM credential blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSecret {
    pub ai_api_key: String,
}

/// Messaging provider credential blob (WhatsApp/SMS flavor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwilioSecret {
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_template_sid: String,
}

/// Email provider credential blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendGridSecret {
    pub sendgrid_auth_value: String,
    pub sendgrid_from_email: String,
    pub sendgrid_from_name: String,
    pub sendgrid_template_id: String,
}

/// Provider credentials after channel-appropriate parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSecret {
    Twilio(TwilioSecret),
    SendGrid(SendGridSecret),
}

impl ProviderSecret {
    /// The provider-approved template identifier carried in the blob.
    pub fn template_id(&self) -> &str {
        match self {
            ProviderSecret::Twilio(secret) => &secret.twilio_template_sid,
            ProviderSecret::SendGrid(secret) => &secret.sendgrid_template_id,
        }
    }
}

/// Fetch and deserialize a blob of a known shape.
pub async fn fetch_typed<T: DeserializeOwned>(
    store: &dyn SecretStore,
    reference: &str,
) -> Result<T, SecretError> {
    let value = store.fetch(reference).await?;
    serde_json::from_value(value).map_err(|e| SecretError::Malformed {
        reference: reference.to_string(),
        detail: e.to_string(),
    })
}

/// Fetch and parse the provider blob appropriate for `channel`.
pub async fn fetch_provider_secret(
    store: &dyn SecretStore,
    reference: &str,
    channel: ChannelMethod,
) -> Result<ProviderSecret, SecretError> {
    match channel {
        ChannelMethod::Whatsapp | ChannelMethod::Sms => {
            Ok(ProviderSecret::Twilio(fetch_typed(store, reference).await?))
        }
        ChannelMethod::Email => Ok(ProviderSecret::SendGrid(
            fetch_typed(store, reference).await?,
        )),
    }
}

/// In-memory secret store used by the local stack and the test suite.
pub struct InMemorySecretStore {
    blobs: RwLock<HashMap<String, Value>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, reference: impl Into<String>, blob: Value) {
        self.blobs.write().await.insert(reference.into(), blob);
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn fetch(&self, reference: &str) -> Result<Value, SecretError> {
        let blobs = self.blobs.read().await;
        blobs
            .get(reference)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn typed_fetch_parses_each_documented_blob() {
        let store = InMemorySecretStore::new();
        store
            .insert("llm", json!({"ai_api_key": "sk-test"}))
            .await;
        store
            .insert(
                "twilio",
                json!({
                    "twilio_account_sid": "AC123",
                    "twilio_auth_token": "token",
                    "twilio_template_sid": "HX456"
                }),
            )
            .await;

        let llm: LlmSecret = fetch_typed(&store, "llm").await.unwrap();
        assert_eq!(llm.ai_api_key, "sk-test");

        let provider = fetch_provider_secret(&store, "twilio", ChannelMethod::Whatsapp)
            .await
            .unwrap();
        assert_eq!(provider.template_id(), "HX456");
    }

    #[tokio::test]
    async fn missing_and_malformed_blobs_are_distinct_errors() {
        let store = InMemorySecretStore::new();
        store.insert("broken", json!({"unexpected": true})).await;

        match fetch_typed::<LlmSecret>(&store, "absent").await {
            Err(SecretError::NotFound(reference)) => assert_eq!(reference, "absent"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
        match fetch_typed::<LlmSecret>(&store, "broken").await {
            Err(SecretError::Malformed { reference, .. }) => assert_eq!(reference, "broken"),
            other => panic!("expected Malformed, got {:?}", other.map(|_| ())),
        }
    }
}
