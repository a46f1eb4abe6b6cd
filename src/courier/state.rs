//! Conversation records and the state store.
//!
//! A conversation record is keyed by `(primary_channel, conversation_id)`:
//! partition key is the recipient identifier (telephone for WhatsApp/SMS,
//! email for email), sort key is the composite conversation id. The record is
//! created exactly once per logical request by [`StateStore::create_initial`],
//! whose conditional-insert semantics are the engine's sole idempotency
//! barrier — everything downstream of it (LLM billing, provider send) relies
//! on that exclusivity.
//!
//! Status is monotonic: `processing` moves to `initial_message_sent` or
//! `failed` and nothing else. The `messages` history only grows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

/// Lifecycle status of a conversation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Record created, pipeline in flight.
    Processing,
    /// First outbound message handed to the provider and state finalized.
    InitialMessageSent,
    /// Pipeline failed before the provider send.
    Failed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Processing => "processing",
            ConversationStatus::InitialMessageSent => "initial_message_sent",
            ConversationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a conversation's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Wall time the step that produced this entry took.
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
}

/// Identity of a stored conversation record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub primary_channel: String,
    pub conversation_id: String,
}

impl ConversationKey {
    pub fn new(primary_channel: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            primary_channel: primary_channel.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

/// A stored conversation record. Field names are stable: the reply and
/// reconciliation pipelines read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub primary_channel: String,
    pub conversation_id: String,
    pub company_id: String,
    pub project_id: String,
    pub channel_method: String,
    pub conversation_status: ConversationStatus,
    /// 0 until the pipeline has fully completed, then 1.
    pub task_complete: u8,
    pub created_at: String,
    pub updated_at: String,
    pub request_id: String,
    pub router_version: String,
    pub processor_version: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageEntry>,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub project_data: Option<Value>,
    #[serde(default)]
    pub company_reps: Option<Value>,
    /// Verbatim AI config snapshot for audit and reply handling.
    pub ai_config: Value,
    /// Verbatim channel config snapshot for audit and reply handling.
    pub channel_config: Value,
    /// Reserved for the reply pipeline; always initialized false/null here.
    #[serde(default)]
    pub hand_off_to_human: bool,
    #[serde(default)]
    pub hand_off_reason: Option<String>,
}

impl ConversationRecord {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.primary_channel.clone(), self.conversation_id.clone())
    }
}

/// Result of the conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The record did not exist and was written.
    Inserted,
    /// A record with this key already exists; carries its current status so
    /// the caller can classify the duplicate.
    AlreadyExists(ConversationStatus),
}

/// Attribute patch applied after a successful provider send.
#[derive(Debug, Clone)]
pub struct UpdateAfterSend {
    /// Assistant entry appended to the message history.
    pub message: MessageEntry,
    pub thread_id: String,
    pub provider_message_id: String,
    /// Total pipeline wall time for this invocation.
    pub processing_time_ms: u64,
    pub updated_at: String,
}

/// Transport or consistency failure in the state store.
#[derive(Debug)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state store error: {}", self.0)
    }
}

impl Error for StoreError {}

/// Conversation state persistence.
///
/// `create_initial` is the only operation that may bring a record into
/// existence; its insert-if-absent predicate on the sort key is what bounds
/// provider sends to at most one per conversation id.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Conditionally insert `record`, predicated on no existing record with
    /// the same key.
    async fn create_initial(&self, record: ConversationRecord)
        -> Result<CreateOutcome, StoreError>;

    /// Atomically apply the post-send patch: set final attributes and append
    /// the assistant message (creating the list if absent).
    async fn update_after_send(
        &self,
        key: &ConversationKey,
        patch: UpdateAfterSend,
    ) -> Result<(), StoreError>;

    /// Best-effort status transition used on failure paths.
    async fn update_status(
        &self,
        key: &ConversationKey,
        status: ConversationStatus,
        updated_at: String,
    ) -> Result<(), StoreError>;

    /// Read a record back; used by audit tooling and the test suite.
    async fn fetch(&self, key: &ConversationKey) -> Result<Option<ConversationRecord>, StoreError>;
}

/// Linearizable in-memory state store: one mutex around the whole map, so the
/// conditional insert really is atomic with respect to concurrent callers.
pub struct InMemoryStateStore {
    rows: Mutex<HashMap<(String, String), ConversationRecord>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn map_key(key: &ConversationKey) -> (String, String) {
    (key.primary_channel.clone(), key.conversation_id.clone())
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_initial(
        &self,
        record: ConversationRecord,
    ) -> Result<CreateOutcome, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let key = (record.primary_channel.clone(), record.conversation_id.clone());
        if let Some(existing) = rows.get(&key) {
            return Ok(CreateOutcome::AlreadyExists(existing.conversation_status));
        }
        rows.insert(key, record);
        Ok(CreateOutcome::Inserted)
    }

    async fn update_after_send(
        &self,
        key: &ConversationKey,
        patch: UpdateAfterSend,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let record = rows
            .get_mut(&map_key(key))
            .ok_or_else(|| StoreError(format!("no record for {}", key.conversation_id)))?;
        if record.conversation_status != ConversationStatus::Processing {
            return Err(StoreError(format!(
                "illegal transition {} -> initial_message_sent for {}",
                record.conversation_status, key.conversation_id
            )));
        }
        record.conversation_status = ConversationStatus::InitialMessageSent;
        record.task_complete = 1;
        record.thread_id = Some(patch.thread_id);
        record.provider_message_id = Some(patch.provider_message_id);
        record.processing_time_ms = Some(patch.processing_time_ms);
        record.updated_at = patch.updated_at;
        record.messages.push(patch.message);
        Ok(())
    }

    async fn update_status(
        &self,
        key: &ConversationKey,
        status: ConversationStatus,
        updated_at: String,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let record = rows
            .get_mut(&map_key(key))
            .ok_or_else(|| StoreError(format!("no record for {}", key.conversation_id)))?;
        if record.conversation_status != ConversationStatus::Processing {
            return Err(StoreError(format!(
                "illegal transition {} -> {} for {}",
                record.conversation_status, status, key.conversation_id
            )));
        }
        record.conversation_status = status;
        record.updated_at = updated_at;
        Ok(())
    }

    async fn fetch(&self, key: &ConversationKey) -> Result<Option<ConversationRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&map_key(key)).cloned())
    }
}
