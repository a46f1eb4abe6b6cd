//! Shared primitives for the LLM and messaging provider clients.
//!
//! The pipeline talks to external services exclusively through the two traits
//! defined here. [`AssistantRunner`] covers the LLM side: open a fresh
//! conversation session, submit the serialized Context Object, run the
//! configured assistant and poll to a terminal state within a bounded budget.
//! [`TemplateSender`] covers the messaging side: one templated send, returning
//! the provider's opaque message id.
//!
//! Both traits are implemented by thin stateless clients under
//! [`crate::courier::clients`]; tests substitute scripted fakes. Neither side
//! retries internally — retry policy for the whole pipeline is expressed by
//! the queue's redelivery.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::courier::channel::ChannelMethod;
use crate::courier::secrets::ProviderSecret;

/// Token accounting reported by the LLM for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// How run-status polling is paced and bounded.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Fixed wait between status checks.
    pub interval: Duration,
    /// Total wall-clock budget; exceeding it is a timeout failure.
    pub budget: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            budget: Duration::from_secs(120),
        }
    }
}

/// Outcome of a completed assistant run.
#[derive(Debug, Clone)]
pub struct AssistantExchange {
    /// Provider-side conversation session handle, persisted for the reply
    /// pipeline.
    pub thread_id: String,
    /// Raw assistant reply text; the pipeline parses it as a JSON variable
    /// map.
    pub reply: String,
    pub usage: Option<TokenUsage>,
    /// Wall time from session creation to reply retrieval.
    pub elapsed_ms: u64,
}

/// LLM-side failure kinds, kept distinct so operators can tell a transport
/// blip from a run that genuinely went wrong.
#[derive(Debug)]
pub enum LlmError {
    /// Connection/TLS/IO failure before a response was obtained.
    Transport(String),
    /// The API answered with a non-success status.
    Api { status: u16, detail: String },
    /// The polling budget elapsed without the run reaching a terminal state.
    Timeout { waited_ms: u64 },
    /// The run reached a terminal state other than `completed`.
    RunFailed { status: String },
    /// The reply was retrieved but is unusable (not the expected shape).
    BadReply(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Transport(detail) => write!(f, "llm transport error: {}", detail),
            LlmError::Api { status, detail } => {
                write!(f, "llm api error (http {}): {}", status, detail)
            }
            LlmError::Timeout { waited_ms } => {
                write!(f, "llm run polling exceeded budget after {} ms", waited_ms)
            }
            LlmError::RunFailed { status } => {
                write!(f, "llm run ended in terminal status '{}'", status)
            }
            LlmError::BadReply(detail) => write!(f, "llm reply unusable: {}", detail),
        }
    }
}

impl Error for LlmError {}

/// Drives one assistant conversation from session creation to reply.
#[async_trait]
pub trait AssistantRunner: Send + Sync {
    /// Open a fresh session, submit `initial_message` as the first user
    /// message, start a run with `assistant_id`, poll it to completion within
    /// `poll`'s budget and return the assistant's reply.
    async fn run_to_completion(
        &self,
        api_key: &str,
        assistant_id: &str,
        initial_message: &str,
        poll: &PollPolicy,
    ) -> Result<AssistantExchange, LlmError>;
}

/// One templated provider send.
#[derive(Debug, Clone)]
pub struct TemplateSend {
    pub channel: ChannelMethod,
    /// The tenant's sender identity from channel config.
    pub sender: String,
    /// Recipient identifier from the Context Object.
    pub recipient: String,
    /// Variable bindings produced by the assistant, one per template slot.
    pub variables: Map<String, Value>,
}

/// Messaging-provider failure kinds.
#[derive(Debug)]
pub enum ProviderError {
    /// Connection/TLS/IO failure before a response was obtained.
    Transport(String),
    /// The provider answered with a non-success status.
    Api { status: u16, detail: String },
    /// The credentials blob does not match this client's provider.
    WrongCredentials(String),
    /// The provider accepted the request but returned no message id.
    MissingMessageId,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(detail) => write!(f, "provider transport error: {}", detail),
            ProviderError::Api { status, detail } => {
                write!(f, "provider api error (http {}): {}", status, detail)
            }
            ProviderError::WrongCredentials(detail) => {
                write!(f, "wrong credentials kind for provider: {}", detail)
            }
            ProviderError::MissingMessageId => {
                write!(f, "provider response carried no message id")
            }
        }
    }
}

impl Error for ProviderError {}

/// Sends one provider-approved template with variable bindings.
#[async_trait]
pub trait TemplateSender: Send + Sync {
    /// Dispatch the templated message. The template identifier comes from the
    /// credentials blob; returns the provider's opaque message id.
    async fn send_template(
        &self,
        credentials: &ProviderSecret,
        send: &TemplateSend,
    ) -> Result<String, ProviderError>;
}
