//! Channel processor: the queue-triggered orchestrator.
//!
//! Each queue message carries one Context Object and moves through a strict
//! pipeline: decode, heartbeat start, idempotent record creation, credential
//! fetch, LLM invocation, provider send, final state update, heartbeat stop.
//! Messages in a batch are processed independently — one failing never
//! affects its siblings.
//!
//! Two rules dominate the design:
//!
//! - **The conditional insert is the only send gate.** Credential reads, the
//!   LLM run and the provider send are not idempotent, so they run only when
//!   this invocation actually created the record. Any later delivery of the
//!   same conversation id short-circuits.
//! - **After the provider has accepted the message, the queue must never
//!   redeliver it.** A state-update failure at that point is the engine's one
//!   critical event: it is alerted, the message is deleted, and the record is
//!   left for manual reconciliation.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::courier::alert::{AlertSink, CriticalAlert};
use crate::courier::channel::ChannelMethod;
use crate::courier::config::EngineConfig;
use crate::courier::context::{now_rfc3339, ContextObject};
use crate::courier::heartbeat::Heartbeat;
use crate::courier::providers::{AssistantRunner, PollPolicy, TemplateSend, TemplateSender};
use crate::courier::queue::{QueueError, QueueMessage, WorkQueue};
use crate::courier::secrets::{
    fetch_provider_secret, fetch_typed, LlmSecret, SecretStore,
};
use crate::courier::state::{
    ConversationKey, ConversationRecord, ConversationStatus, CreateOutcome, MessageEntry,
    StateStore, UpdateAfterSend,
};

/// Tunables the processor needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub processor_version: String,
    pub heartbeat_interval: std::time::Duration,
    pub heartbeat_extension: std::time::Duration,
    pub poll: PollPolicy,
}

impl ProcessorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            processor_version: config.processor_version.clone(),
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_extension: config.heartbeat_extension,
            poll: PollPolicy {
                interval: config.llm_poll_interval,
                budget: config.llm_poll_budget,
            },
        }
    }
}

/// Per-channel provider client bindings: WhatsApp and SMS share the
/// messaging client, email has its own.
#[derive(Clone)]
pub struct ChannelSenders {
    messaging: Arc<dyn TemplateSender>,
    email: Arc<dyn TemplateSender>,
}

impl ChannelSenders {
    pub fn new(messaging: Arc<dyn TemplateSender>, email: Arc<dyn TemplateSender>) -> Self {
        Self { messaging, email }
    }

    fn for_channel(&self, channel: ChannelMethod) -> &Arc<dyn TemplateSender> {
        match channel {
            ChannelMethod::Whatsapp | ChannelMethod::Sms => &self.messaging,
            ChannelMethod::Email => &self.email,
        }
    }
}

/// Final classification of one processed message.
#[derive(Debug)]
pub enum MessageDisposition {
    /// Full pipeline success: record finalized, provider send recorded.
    Sent,
    /// A record for this conversation already exists and is owned or
    /// completed elsewhere; nothing was re-run.
    Duplicate,
    /// The provider accepted the message but the final state update failed.
    /// The critical alert fired; the message must still leave the queue.
    SentStateUpdateFailed,
    /// Pre-send failure; the queue should redeliver.
    Failed(String),
    /// The message body was not a decodable Context Object.
    Rejected(String),
}

impl MessageDisposition {
    /// Whether the queue message should be deleted (true) or left for
    /// redelivery (false).
    pub fn should_delete(&self) -> bool {
        match self {
            MessageDisposition::Sent
            | MessageDisposition::Duplicate
            | MessageDisposition::SentStateUpdateFailed => true,
            MessageDisposition::Failed(_) | MessageDisposition::Rejected(_) => false,
        }
    }
}

/// One message's outcome within a batch.
#[derive(Debug)]
pub struct MessageOutcome {
    pub message_id: String,
    pub receipt_handle: String,
    pub disposition: MessageDisposition,
}

/// The queue-triggered orchestrator for the send path.
pub struct ChannelProcessor {
    queue: Arc<dyn WorkQueue>,
    state: Arc<dyn StateStore>,
    secrets: Arc<dyn SecretStore>,
    llm: Arc<dyn AssistantRunner>,
    senders: ChannelSenders,
    alerts: Arc<dyn AlertSink>,
    settings: ProcessorSettings,
}

impl ChannelProcessor {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        state: Arc<dyn StateStore>,
        secrets: Arc<dyn SecretStore>,
        llm: Arc<dyn AssistantRunner>,
        senders: ChannelSenders,
        alerts: Arc<dyn AlertSink>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            queue,
            state,
            secrets,
            llm,
            senders,
            alerts,
            settings,
        }
    }

    /// Receive up to `max_messages`, process them, and delete the ones whose
    /// disposition says so. Failures stay leased and redeliver once their
    /// visibility lapses.
    pub async fn run_once(&self, max_messages: usize) -> Result<Vec<MessageOutcome>, QueueError> {
        let messages = self.queue.receive(max_messages).await?;
        let outcomes = self.process_batch(messages).await;
        for outcome in outcomes.iter() {
            if outcome.disposition.should_delete() {
                if let Err(e) = self.queue.delete(&outcome.receipt_handle).await {
                    log::warn!(
                        "could not delete message {} after {:?}: {}",
                        outcome.message_id,
                        outcome.disposition,
                        e
                    );
                }
            }
        }
        Ok(outcomes)
    }

    /// Process a batch of queue messages independently, in order.
    pub async fn process_batch(&self, messages: Vec<QueueMessage>) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages.iter() {
            let disposition = self.process_message(message).await;
            outcomes.push(MessageOutcome {
                message_id: message.message_id.clone(),
                receipt_handle: message.receipt_handle.clone(),
                disposition,
            });
        }
        outcomes
    }

    /// Run one message through the full pipeline.
    pub async fn process_message(&self, message: &QueueMessage) -> MessageDisposition {
        // S1: decode and structurally validate the Context Object.
        let context: ContextObject = match serde_json::from_str(&message.body) {
            Ok(context) => context,
            Err(e) => {
                log::error!(
                    "message {} does not decode as a context object: {}",
                    message.message_id,
                    e
                );
                return MessageDisposition::Rejected(e.to_string());
            }
        };
        let channel = match context.channel() {
            Some(channel) => channel,
            None => {
                log::error!(
                    "message {} names unknown channel '{}'",
                    message.message_id,
                    context.frontend_payload.request_data.channel_method
                );
                return MessageDisposition::Rejected("unknown channel".to_string());
            }
        };

        // S2: keep the queue lease alive for the duration of the pipeline.
        let heartbeat = Heartbeat::start(
            self.queue.clone(),
            message.receipt_handle.clone(),
            self.settings.heartbeat_interval,
            self.settings.heartbeat_extension,
        );

        let disposition = self
            .run_pipeline(&context, channel, message.receive_count)
            .await;

        // S8: a heartbeat error never flips an otherwise-decided outcome.
        if let Some(e) = heartbeat.stop().await {
            log::warn!(
                "heartbeat for message {} recorded an error: {}",
                message.message_id,
                e
            );
        }

        disposition
    }

    async fn run_pipeline(
        &self,
        context: &ContextObject,
        channel: ChannelMethod,
        receive_count: u32,
    ) -> MessageDisposition {
        let started = Instant::now();
        let conversation_id = context.conversation_data.conversation_id.clone();
        let primary_channel = context
            .frontend_payload
            .primary_recipient(channel)
            .to_string();
        let key = ConversationKey::new(primary_channel.clone(), conversation_id.clone());

        // S3: conditional insert — the idempotency barrier. Everything with
        // external side effects sits strictly after this gate.
        let record = initial_record(context, channel, &self.settings.processor_version);
        match self.state.create_initial(record).await {
            Ok(CreateOutcome::Inserted) => {}
            Ok(CreateOutcome::AlreadyExists(status)) => {
                return classify_duplicate(&conversation_id, status, receive_count);
            }
            Err(e) => {
                log::error!(
                    "could not create initial record for {}: {}",
                    conversation_id,
                    e
                );
                return MessageDisposition::Failed(format!("record creation: {}", e));
            }
        }

        // S4: resolve tenant-scoped credentials.
        let ai_config = &context.company_data_payload.ai_config;
        let llm_secret: LlmSecret =
            match fetch_typed(self.secrets.as_ref(), &ai_config.api_key_reference).await {
                Ok(secret) => secret,
                Err(e) => return self.fail(&key, "llm credential fetch", e.to_string()).await,
            };
        let channel_config = &context.company_data_payload.channel_config;
        let provider_secret = match fetch_provider_secret(
            self.secrets.as_ref(),
            &channel_config.credentials_reference,
            channel,
        )
        .await
        {
            Ok(secret) => secret,
            Err(e) => {
                return self
                    .fail(&key, "provider credential fetch", e.to_string())
                    .await
            }
        };

        // S5: run the assistant over the serialized context and parse its
        // reply into template variables.
        let assistant_id = match ai_config.assistant_for(channel) {
            Some(id) => id.to_string(),
            None => {
                return self
                    .fail(
                        &key,
                        "assistant resolution",
                        format!("no assistant configured for channel '{}'", channel),
                    )
                    .await
            }
        };
        let initial_message = match serde_json::to_string(context) {
            Ok(serialized) => serialized,
            Err(e) => return self.fail(&key, "context serialization", e.to_string()).await,
        };
        let exchange = match self
            .llm
            .run_to_completion(
                &llm_secret.ai_api_key,
                &assistant_id,
                &initial_message,
                &self.settings.poll,
            )
            .await
        {
            Ok(exchange) => exchange,
            Err(e) => return self.fail(&key, "llm run", e.to_string()).await,
        };
        let variables =
            match parse_variables(&exchange.reply, &channel_config.template_variables) {
                Ok(variables) => variables,
                Err(detail) => return self.fail(&key, "llm reply contract", detail).await,
            };
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "assistant filled {} template slots for {} in {} ms",
                variables.len(),
                conversation_id,
                exchange.elapsed_ms
            );
        }

        // S6: the one provider send this conversation will ever get.
        let send = TemplateSend {
            channel,
            sender: channel_config.sender_identity.clone(),
            recipient: primary_channel.clone(),
            variables: variables.clone(),
        };
        let provider_message_id = match self
            .senders
            .for_channel(channel)
            .send_template(&provider_secret, &send)
            .await
        {
            Ok(id) => id,
            Err(e) => return self.fail(&key, "provider send", e.to_string()).await,
        };

        // S7: finalize the record. From here on the message must leave the
        // queue no matter what — the provider already accepted the send.
        let now = now_rfc3339();
        let entry = MessageEntry {
            role: "assistant".to_string(),
            content: serde_json::to_string(&Value::Object(variables))
                .unwrap_or_else(|_| exchange.reply.clone()),
            created_at: now.clone(),
            input_tokens: exchange.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: exchange.usage.as_ref().map(|u| u.output_tokens),
            total_tokens: exchange.usage.as_ref().map(|u| u.total_tokens),
            processing_time_ms: Some(exchange.elapsed_ms),
        };
        let patch = UpdateAfterSend {
            message: entry,
            thread_id: exchange.thread_id.clone(),
            provider_message_id: provider_message_id.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            updated_at: now,
        };
        match self.state.update_after_send(&key, patch).await {
            Ok(()) => {
                log::info!(
                    "conversation {} sent via '{}' as provider message {} in {} ms",
                    conversation_id,
                    channel,
                    provider_message_id,
                    started.elapsed().as_millis()
                );
                MessageDisposition::Sent
            }
            Err(e) => {
                let alert = CriticalAlert {
                    conversation_id: conversation_id.clone(),
                    primary_channel,
                    provider_message_id,
                    thread_id: Some(exchange.thread_id),
                    intended_status: ConversationStatus::InitialMessageSent
                        .as_str()
                        .to_string(),
                    detail: e.to_string(),
                };
                self.alerts.critical(&alert).await;
                MessageDisposition::SentStateUpdateFailed
            }
        }
    }

    /// Record a pre-send failure: best-effort `failed` status, then hand the
    /// message back for redelivery.
    async fn fail(
        &self,
        key: &ConversationKey,
        step: &str,
        detail: String,
    ) -> MessageDisposition {
        log::error!(
            "pipeline step '{}' failed for {}: {}",
            step,
            key.conversation_id,
            detail
        );
        if let Err(e) = self
            .state
            .update_status(key, ConversationStatus::Failed, now_rfc3339())
            .await
        {
            log::warn!(
                "could not record failed status for {}: {}",
                key.conversation_id,
                e
            );
        }
        MessageDisposition::Failed(format!("{}: {}", step, detail))
    }
}

/// Classify an `AlreadyExists` outcome from the conditional insert.
///
/// Live or completed records mean some other delivery owns this conversation:
/// drop the message so the send count stays bounded. A terminally failed
/// record means no send ever happened and none will; the message is left to
/// drain to the dead-letter queue where operators can see it.
fn classify_duplicate(
    conversation_id: &str,
    status: ConversationStatus,
    receive_count: u32,
) -> MessageDisposition {
    match status {
        ConversationStatus::Processing | ConversationStatus::InitialMessageSent => {
            if receive_count <= 1 {
                log::info!(
                    "duplicate client submission for {} (record is {}), dropping message",
                    conversation_id,
                    status
                );
            } else {
                log::info!(
                    "redelivery after partial failure for {} (record is {}), dropping message",
                    conversation_id,
                    status
                );
            }
            MessageDisposition::Duplicate
        }
        ConversationStatus::Failed => {
            log::warn!(
                "conversation {} already failed terminally; leaving message for the dead-letter queue",
                conversation_id
            );
            MessageDisposition::Failed("prior attempt terminally failed".to_string())
        }
    }
}

/// The record written by the conditional insert: `processing` status, empty
/// history, and full config snapshots for audit and reply handling.
fn initial_record(
    context: &ContextObject,
    channel: ChannelMethod,
    processor_version: &str,
) -> ConversationRecord {
    let now = now_rfc3339();
    ConversationRecord {
        primary_channel: context
            .frontend_payload
            .primary_recipient(channel)
            .to_string(),
        conversation_id: context.conversation_data.conversation_id.clone(),
        company_id: context.frontend_payload.company_data.company_id.clone(),
        project_id: context.frontend_payload.company_data.project_id.clone(),
        channel_method: channel.as_str().to_string(),
        conversation_status: ConversationStatus::Processing,
        task_complete: 0,
        created_at: now.clone(),
        updated_at: now,
        request_id: context.frontend_payload.request_data.request_id.clone(),
        router_version: context.metadata.router_version.clone(),
        processor_version: processor_version.to_string(),
        thread_id: None,
        messages: Vec::new(),
        processing_time_ms: None,
        provider_message_id: None,
        project_data: context.frontend_payload.project_data.clone(),
        company_reps: context.company_data_payload.company_reps.clone(),
        ai_config: serde_json::to_value(&context.company_data_payload.ai_config)
            .unwrap_or(Value::Null),
        channel_config: serde_json::to_value(&context.company_data_payload.channel_config)
            .unwrap_or(Value::Null),
        hand_off_to_human: false,
        hand_off_reason: None,
    }
}

/// Parse the assistant reply as the template variable map and check the
/// required slots.
fn parse_variables(
    reply: &str,
    required_slots: &[String],
) -> Result<Map<String, Value>, String> {
    let value: Value = serde_json::from_str(reply)
        .map_err(|e| format!("reply is not valid JSON: {}", e))?;
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "reply must be a JSON object of template variables, got {}",
                kind_of(&other)
            ))
        }
    };
    if map.is_empty() {
        return Err("reply carried no template variables".to_string());
    }
    for slot in required_slots.iter() {
        if !map.contains_key(slot) {
            return Err(format!("reply is missing required variable '{}'", slot));
        }
    }
    Ok(map)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
