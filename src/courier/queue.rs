//! Per-channel work queue with at-least-once delivery and a dead-letter
//! companion.
//!
//! The queue contract mirrors the managed queue the engine deploys against:
//! unordered, at-least-once, per-delivery receipt handles, a visibility lease
//! that hides an in-flight message from other consumers, lease extension for
//! long-running work, and dead-lettering once a message has been received
//! `max_receive_count` times without being deleted.
//!
//! [`InMemoryQueue`] implements the full contract behind a single mutex so the
//! test harness can exercise redelivery, lease expiry and dead-lettering
//! deterministically.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One delivered queue message.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Stable id assigned at enqueue time.
    pub message_id: String,
    /// UTF-8 JSON serialization of the Context Object.
    pub body: String,
    /// Per-delivery handle used for lease extension and deletion.
    pub receipt_handle: String,
    /// How many times this message has been delivered, this delivery
    /// included.
    pub receive_count: u32,
    /// Optional attributes for consumer-side filtering and telemetry.
    pub attributes: HashMap<String, String>,
}

/// Failure talking to the queue.
#[derive(Debug)]
pub enum QueueError {
    /// The receipt handle does not name a message currently in flight.
    NotInFlight(String),
    /// Transport-level failure.
    Transport(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::NotInFlight(handle) => {
                write!(f, "receipt handle not in flight: {}", handle)
            }
            QueueError::Transport(detail) => write!(f, "queue error: {}", detail),
        }
    }
}

impl Error for QueueError {}

/// Unordered at-least-once message queue with per-message leases.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a message body with optional attributes; returns the message
    /// id.
    async fn send(
        &self,
        body: String,
        attributes: HashMap<String, String>,
    ) -> Result<String, QueueError>;

    /// Deliver up to `max_messages` currently-visible messages, starting
    /// their visibility leases.
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Reset the visibility lease of an in-flight message to `extension` from
    /// now.
    async fn extend_visibility(
        &self,
        receipt_handle: &str,
        extension: Duration,
    ) -> Result<(), QueueError>;

    /// Remove an in-flight message permanently.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

struct Entry {
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    /// When this message becomes visible again. In the past = deliverable.
    visible_at: Instant,
    /// Receipt handle of the latest delivery; stale handles are rejected.
    receipt_handle: Option<String>,
}

struct Inner {
    entries: VecDeque<Entry>,
    dead_letters: Vec<QueueMessage>,
}

/// In-memory queue with visibility leases and a dead-letter companion.
pub struct InMemoryQueue {
    name: String,
    visibility_timeout: Duration,
    max_receive_count: u32,
    inner: Mutex<Inner>,
}

impl InMemoryQueue {
    /// A message delivered `max_receive_count` times without deletion moves
    /// to the dead-letter list on its next receive attempt.
    pub fn new(name: impl Into<String>, visibility_timeout: Duration, max_receive_count: u32) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            max_receive_count,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                dead_letters: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the dead-letter companion.
    pub fn dead_letters(&self) -> Vec<QueueMessage> {
        self.inner.lock().unwrap().dead_letters.clone()
    }

    /// Messages still held by the queue (visible or in flight).
    pub fn depth(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Force every lease to expire immediately. Test-harness hook for
    /// simulating redelivery without waiting out real visibility timeouts.
    pub fn expire_leases(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        for entry in inner.entries.iter_mut() {
            if entry.visible_at > now {
                entry.visible_at = now;
            }
        }
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn send(
        &self,
        body: String,
        attributes: HashMap<String, String>,
    ) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap();
        inner.entries.push_back(Entry {
            message_id: message_id.clone(),
            body,
            attributes,
            receive_count: 0,
            visible_at: Instant::now(),
            receipt_handle: None,
        });
        Ok(message_id)
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let mut delivered = Vec::new();
        let mut kept = VecDeque::new();

        while let Some(mut entry) = inner.entries.pop_front() {
            let deliverable = entry.visible_at <= now && delivered.len() < max_messages;
            if !deliverable {
                kept.push_back(entry);
                continue;
            }
            if entry.receive_count >= self.max_receive_count {
                // Redelivery budget exhausted: dead-letter instead of
                // delivering again.
                inner.dead_letters.push(QueueMessage {
                    message_id: entry.message_id,
                    body: entry.body,
                    receipt_handle: String::new(),
                    receive_count: entry.receive_count,
                    attributes: entry.attributes,
                });
                continue;
            }
            entry.receive_count += 1;
            let receipt_handle = Uuid::new_v4().to_string();
            entry.receipt_handle = Some(receipt_handle.clone());
            entry.visible_at = now + self.visibility_timeout;
            delivered.push(QueueMessage {
                message_id: entry.message_id.clone(),
                body: entry.body.clone(),
                receipt_handle,
                receive_count: entry.receive_count,
                attributes: entry.attributes.clone(),
            });
            kept.push_back(entry);
        }

        inner.entries = kept;
        Ok(delivered)
    }

    async fn extend_visibility(
        &self,
        receipt_handle: &str,
        extension: Duration,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        for entry in inner.entries.iter_mut() {
            if entry.receipt_handle.as_deref() == Some(receipt_handle) {
                if entry.visible_at <= now {
                    // Lease already expired; the handle is stale.
                    return Err(QueueError::NotInFlight(receipt_handle.to_string()));
                }
                entry.visible_at = now + extension;
                return Ok(());
            }
        }
        Err(QueueError::NotInFlight(receipt_handle.to_string()))
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|entry| entry.receipt_handle.as_deref() != Some(receipt_handle));
        if inner.entries.len() == before {
            return Err(QueueError::NotInFlight(receipt_handle.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> InMemoryQueue {
        InMemoryQueue::new("test-queue", Duration::from_secs(30), 3)
    }

    #[tokio::test]
    async fn delivered_messages_are_invisible_until_lease_expiry() {
        let q = queue();
        q.send("a".to_string(), HashMap::new()).await.unwrap();

        let first = q.receive(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);

        // Still leased: nothing to deliver.
        assert!(q.receive(10).await.unwrap().is_empty());

        q.expire_leases();
        let second = q.receive(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
    }

    #[tokio::test]
    async fn delete_requires_the_current_receipt() {
        let q = queue();
        q.send("a".to_string(), HashMap::new()).await.unwrap();
        let first = q.receive(10).await.unwrap().remove(0);

        q.expire_leases();
        let second = q.receive(10).await.unwrap().remove(0);

        // The first delivery's handle went stale on redelivery.
        assert!(q.delete(&first.receipt_handle).await.is_err());
        q.delete(&second.receipt_handle).await.unwrap();
        assert_eq!(q.depth(), 0);
    }

    #[tokio::test]
    async fn exhausted_messages_move_to_the_dead_letter_list() {
        let q = queue();
        q.send("doomed".to_string(), HashMap::new()).await.unwrap();

        for attempt in 1..=3u32 {
            let batch = q.receive(10).await.unwrap();
            assert_eq!(batch.len(), 1, "attempt {}", attempt);
            assert_eq!(batch[0].receive_count, attempt);
            q.expire_leases();
        }

        // Fourth receive attempt dead-letters instead of delivering.
        assert!(q.receive(10).await.unwrap().is_empty());
        let dead = q.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, "doomed");
        assert_eq!(dead[0].receive_count, 3);
        assert_eq!(q.depth(), 0);
    }

    #[tokio::test]
    async fn extension_keeps_a_message_leased() {
        let q = queue();
        q.send("a".to_string(), HashMap::new()).await.unwrap();
        let leased = q.receive(10).await.unwrap().remove(0);
        q.extend_visibility(&leased.receipt_handle, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(q.receive(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn extending_an_expired_lease_is_rejected() {
        let q = queue();
        q.send("a".to_string(), HashMap::new()).await.unwrap();
        let leased = q.receive(10).await.unwrap().remove(0);
        q.expire_leases();
        assert!(q
            .extend_visibility(&leased.receipt_handle, Duration::from_secs(60))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn receive_respects_the_batch_cap() {
        let q = queue();
        for i in 0..5 {
            q.send(format!("m{}", i), HashMap::new()).await.unwrap();
        }
        let batch = q.receive(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        let rest = q.receive(10).await.unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[tokio::test]
    async fn attributes_survive_delivery_and_dead_lettering() {
        let q = InMemoryQueue::new("attrs", Duration::from_secs(30), 1);
        let mut attributes = HashMap::new();
        attributes.insert("channel_method".to_string(), "whatsapp".to_string());
        q.send("a".to_string(), attributes).await.unwrap();

        let msg = q.receive(10).await.unwrap().remove(0);
        assert_eq!(
            msg.attributes.get("channel_method").map(|s| s.as_str()),
            Some("whatsapp")
        );

        q.expire_leases();
        assert!(q.receive(10).await.unwrap().is_empty());
        let dead = q.dead_letters();
        assert_eq!(
            dead[0].attributes.get("channel_method").map(|s| s.as_str()),
            Some("whatsapp")
        );
    }
}
