//! Operator alerting for the critical post-send failure.
//!
//! Exactly one event class in the engine pages an operator directly: the
//! final state update failing *after* the provider accepted the message. At
//! that point the queue message must not be redelivered (that would duplicate
//! the send), so the only remaining signal is this alert.
//!
//! The engine's contract is to produce a structured log record at the
//! distinguished severity containing [`CRITICAL_ALERT_MARKER`]; a
//! deployment-time pipeline matches the marker and fans out notifications.
//! [`AlertSink`] exists so tests can assert the record is emitted exactly
//! once.

use async_trait::async_trait;
use serde::Serialize;

/// Fixed textual marker the log-matching pipeline keys on. Changing this
/// string breaks deployed alerting.
pub const CRITICAL_ALERT_MARKER: &str = "final state store update failed";

/// Everything the operator needs to reconcile the record by hand: the
/// identity of the conversation and the attributes that should have been
/// written.
#[derive(Debug, Clone, Serialize)]
pub struct CriticalAlert {
    pub conversation_id: String,
    pub primary_channel: String,
    /// The provider accepted the message under this id.
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    /// Status the record should have ended in (`initial_message_sent`).
    pub intended_status: String,
    /// The store error that prevented the update.
    pub detail: String,
}

/// Fan-out target for the critical event class.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn critical(&self, alert: &CriticalAlert);
}

/// Production sink: one structured `error`-level record carrying the fixed
/// marker and the alert payload as JSON.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn critical(&self, alert: &CriticalAlert) {
        let payload = serde_json::to_string(alert)
            .unwrap_or_else(|_| format!("{{\"conversation_id\":\"{}\"}}", alert.conversation_id));
        log::error!(
            target: "courier::critical",
            "CRITICAL {}: {}",
            CRITICAL_ALERT_MARKER,
            payload
        );
    }
}
