//! The Context Object and its builder.
//!
//! The Context Object is the data contract between the two orchestrators: the
//! ingress assembles it exactly once from the validated request plus the
//! tenant configuration row, serializes it onto the channel queue, and never
//! touches it again. The processor treats it as immutable input.
//!
//! [`build_context`] is deterministic apart from the creation timestamp in
//! `metadata`; in particular the conversation id depends only on the payload,
//! so identical requests always map to the same id regardless of wall clock.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::courier::channel::ChannelMethod;
use crate::courier::error::{ErrorCode, IngressError};
use crate::courier::request::InitiateRequest;
use crate::courier::state::MessageEntry;
use crate::courier::tenant::{AiConfig, ChannelConfig, RateLimits, TenantRecord};

/// Provenance metadata stamped by the ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub router_version: String,
    /// RFC 3339 UTC creation time.
    pub created_at: String,
}

/// Snapshot of the tenant configuration relevant to the requested channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDataPayload {
    pub allowed_channels: Vec<String>,
    /// The requested channel's configuration block.
    pub channel_config: ChannelConfig,
    pub ai_config: AiConfig,
    #[serde(default)]
    pub company_reps: Option<Value>,
    #[serde(default)]
    pub rate_limits: Option<RateLimits>,
}

/// Conversation identity plus the placeholder fields the processor fills in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationData {
    pub conversation_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageEntry>,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
}

/// The immutable record handed from ingress to processor via the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextObject {
    pub metadata: ContextMetadata,
    /// The validated inbound request, echoed verbatim.
    pub frontend_payload: InitiateRequest,
    pub company_data_payload: CompanyDataPayload,
    pub conversation_data: ConversationData,
}

impl ContextObject {
    /// The channel this context targets. Decoding a context with an unknown
    /// channel name is a structural failure at the consumer.
    pub fn channel(&self) -> Option<ChannelMethod> {
        ChannelMethod::parse(&self.frontend_payload.request_data.channel_method)
    }

    /// The recipient identifier used as the state-store partition key.
    pub fn primary_channel(&self) -> Option<&str> {
        let channel = self.channel()?;
        Some(self.frontend_payload.primary_recipient(channel))
    }
}

/// Strip every non-alphanumeric character from a recipient identifier
/// (`"+447123456789"` becomes `"447123456789"`).
///
/// # Example
///
/// ```rust
/// use courier::context::sanitize_recipient;
///
/// assert_eq!(sanitize_recipient("+447123456789"), "447123456789");
/// assert_eq!(sanitize_recipient("alex@example.com"), "alexexamplecom");
/// ```
pub fn sanitize_recipient(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Compose the conversation id:
/// `{company_id}#{project_id}#{request_id}#{sanitized_recipient}`.
///
/// The `request_id` component makes the id unique per logical request; the
/// whole string is the engine's idempotency key and must be reproducible from
/// payload + config alone.
///
/// # Example
///
/// ```rust
/// use courier::context::conversation_id;
///
/// assert_eq!(
///     conversation_id("ci-aaa-001", "pi-aaa-001", "req-001", "+447123456789"),
///     "ci-aaa-001#pi-aaa-001#req-001#447123456789"
/// );
/// ```
pub fn conversation_id(
    company_id: &str,
    project_id: &str,
    request_id: &str,
    recipient: &str,
) -> String {
    format!(
        "{}#{}#{}#{}",
        company_id,
        project_id,
        request_id,
        sanitize_recipient(recipient)
    )
}

/// Current UTC time as the RFC 3339 string format used everywhere in the
/// engine's records.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Assemble the Context Object from a validated request and its tenant row.
///
/// Pure apart from the creation timestamp. Fails only when the tenant row
/// carries no configuration block for the requested channel, which the
/// ingress surfaces as a configuration error.
pub fn build_context(
    payload: &InitiateRequest,
    channel: ChannelMethod,
    tenant: &TenantRecord,
    router_version: &str,
) -> Result<ContextObject, IngressError> {
    let channel_config = tenant.channel_config(channel).ok_or_else(|| {
        IngressError::new(
            ErrorCode::ConfigurationError,
            format!(
                "project {}/{} has no configuration block for channel '{}'",
                tenant.company_id, tenant.project_id, channel
            ),
        )
    })?;

    let recipient = payload.primary_recipient(channel);
    let conversation_id = conversation_id(
        &payload.company_data.company_id,
        &payload.company_data.project_id,
        &payload.request_data.request_id,
        recipient,
    );

    Ok(ContextObject {
        metadata: ContextMetadata {
            router_version: router_version.to_string(),
            created_at: now_rfc3339(),
        },
        frontend_payload: payload.clone(),
        company_data_payload: CompanyDataPayload {
            allowed_channels: tenant.allowed_channels.clone(),
            channel_config: channel_config.clone(),
            ai_config: tenant.ai_config.clone(),
            company_reps: tenant.company_reps.clone(),
            rate_limits: tenant.rate_limits.clone(),
        },
        conversation_data: ConversationData {
            conversation_id,
            thread_id: None,
            messages: Vec::new(),
            processing_time_ms: None,
            provider_message_id: None,
        },
    })
}
