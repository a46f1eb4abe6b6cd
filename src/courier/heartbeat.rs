//! Queue-lease heartbeat.
//!
//! While a message is being processed — the LLM run being the long pole — its
//! visibility lease must keep getting extended or the queue will redeliver it
//! to another worker mid-flight. [`Heartbeat::start`] spawns a background
//! task that extends one message's lease every `interval` until stopped; the
//! task owns nothing but the queue handle and the receipt string, so it can
//! never observe or mutate pipeline state.
//!
//! The first extension error is captured and the task self-terminates: once
//! the queue refuses an extension the lease is lost anyway, and hammering the
//! queue would only add noise.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::courier::queue::WorkQueue;

/// Handle to a running heartbeat task.
///
/// `interval` must be strictly less than `extension`, and both should sit
/// well below the queue's dead-letter threshold; [`Heartbeat::start`] logs a
/// warning when the caller violates this, since the engine validates it at
/// configuration time.
pub struct Heartbeat {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    error: Arc<Mutex<Option<String>>>,
}

impl Heartbeat {
    /// Spawn the heartbeat for one in-flight message.
    pub fn start(
        queue: Arc<dyn WorkQueue>,
        receipt_handle: String,
        interval: Duration,
        extension: Duration,
    ) -> Heartbeat {
        if interval >= extension {
            log::warn!(
                "heartbeat interval {:?} is not below extension {:?}; the lease can lapse between beats",
                interval,
                extension
            );
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let error = Arc::new(Mutex::new(None));
        let error_slot = error.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {
                        match queue.extend_visibility(&receipt_handle, extension).await {
                            Ok(()) => {
                                if log::log_enabled!(log::Level::Trace) {
                                    log::trace!(
                                        "heartbeat extended lease for receipt {} by {:?}",
                                        receipt_handle,
                                        extension
                                    );
                                }
                            }
                            Err(e) => {
                                log::warn!(
                                    "heartbeat failed to extend lease for receipt {}: {}",
                                    receipt_handle,
                                    e
                                );
                                *error_slot.lock().unwrap() = Some(e.to_string());
                                break;
                            }
                        }
                    }
                }
            }
        });

        Heartbeat {
            handle,
            stop_tx,
            error,
        }
    }

    /// The first extension error, if one has been recorded so far.
    pub fn last_error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    /// Signal the task to stop and wait for it to exit. Returns the first
    /// extension error the task recorded, if any.
    pub async fn stop(self) -> Option<String> {
        // The receiver may already be gone if the task self-terminated.
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
        self.error.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::queue::{InMemoryQueue, WorkQueue};
    use std::collections::HashMap;

    async fn leased_message(queue: &InMemoryQueue) -> String {
        queue
            .send("body".to_string(), HashMap::new())
            .await
            .unwrap();
        queue.receive(1).await.unwrap().remove(0).receipt_handle
    }

    #[tokio::test]
    async fn extends_the_lease_until_stopped() {
        let queue = Arc::new(InMemoryQueue::new("hb", Duration::from_secs(60), 5));
        let receipt = leased_message(&queue).await;

        let heartbeat = Heartbeat::start(
            queue.clone() as Arc<dyn WorkQueue>,
            receipt,
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        let error = heartbeat.stop().await;
        assert!(error.is_none());

        // The lease was repeatedly renewed, so the message is still
        // invisible.
        assert!(queue.receive(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn captures_the_first_error_and_self_terminates() {
        let queue = Arc::new(InMemoryQueue::new("hb", Duration::from_secs(60), 5));
        // A receipt that was never issued: every extension fails.
        let heartbeat = Heartbeat::start(
            queue as Arc<dyn WorkQueue>,
            "bogus-receipt".to_string(),
            Duration::from_millis(5),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(heartbeat.last_error().is_some());
        let error = heartbeat.stop().await;
        assert!(error.unwrap().contains("bogus-receipt"));
    }

    #[tokio::test]
    async fn stop_returns_promptly_before_the_first_beat() {
        let queue = Arc::new(InMemoryQueue::new("hb", Duration::from_secs(60), 5));
        let receipt = leased_message(&queue).await;
        let heartbeat = Heartbeat::start(
            queue as Arc<dyn WorkQueue>,
            receipt,
            Duration::from_secs(3600),
            Duration::from_secs(7200),
        );
        // Must not wait out the hour-long interval.
        let error =
            tokio::time::timeout(Duration::from_secs(1), heartbeat.stop())
                .await
                .expect("stop() did not return within the grace period");
        assert!(error.is_none());
    }
}
