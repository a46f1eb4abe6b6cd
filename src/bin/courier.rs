//! Self-hosted courier stack.
//!
//! Runs the ingress HTTP server and one processor poll loop per configured
//! channel inside a single process, against in-memory queue/state stores and
//! the real LLM and provider clients. Tenant rows and secret blobs are seeded
//! from JSON files named by `COURIER_TENANT_FILE` (an array of tenant
//! records) and `COURIER_SECRETS_FILE` (an object mapping reference strings
//! to blobs).
//!
//! This is the deployment shape for development and small installations; the
//! managed-fabric deployment wires the same orchestrators against hosted
//! queue and store backends.

use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use courier::alert::LogAlertSink;
use courier::channel::ChannelMethod;
use courier::clients::{OpenAiAssistantClient, SendGridClient, TwilioClient};
use courier::config::EngineConfig;
use courier::processor::{ChannelProcessor, ChannelSenders, ProcessorSettings};
use courier::queue::{InMemoryQueue, WorkQueue};
use courier::router::{self, ChannelQueues, IngressRouter};
use courier::secrets::InMemorySecretStore;
use courier::state::InMemoryStateStore;
use courier::tenant::{InMemoryConfigStore, TenantRecord};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = EngineConfig::from_env()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.clone()),
    )
    .init();

    let config_store = Arc::new(InMemoryConfigStore::new());
    if let Ok(path) = std::env::var("COURIER_TENANT_FILE") {
        let raw = std::fs::read_to_string(&path)?;
        let records: Vec<TenantRecord> = serde_json::from_str(&raw)?;
        log::info!("seeding {} tenant record(s) from {}", records.len(), path);
        for record in records {
            config_store.insert(record).await;
        }
    }

    let secret_store = Arc::new(InMemorySecretStore::new());
    if let Ok(path) = std::env::var("COURIER_SECRETS_FILE") {
        let raw = std::fs::read_to_string(&path)?;
        let blobs: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)?;
        log::info!("seeding {} secret blob(s) from {}", blobs.len(), path);
        for (reference, blob) in blobs {
            secret_store.insert(reference, blob).await;
        }
    }

    let state_store = Arc::new(InMemoryStateStore::new());
    let alerts = Arc::new(LogAlertSink);

    let llm = Arc::new(match std::env::var("COURIER_LLM_BASE_URL") {
        Ok(base) => OpenAiAssistantClient::new_with_base_url(&base),
        Err(_) => OpenAiAssistantClient::new(),
    });
    let messaging = Arc::new(match std::env::var("COURIER_TWILIO_BASE_URL") {
        Ok(base) => TwilioClient::new_with_base_url(&base),
        Err(_) => TwilioClient::new(),
    });
    let email = Arc::new(match std::env::var("COURIER_SENDGRID_BASE_URL") {
        Ok(base) => SendGridClient::new_with_base_url(&base),
        Err(_) => SendGridClient::new(),
    });
    let senders = ChannelSenders::new(messaging, email);
    let settings = ProcessorSettings::from_config(&config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut queues = ChannelQueues::new();
    let mut workers = Vec::new();

    for channel in ChannelMethod::all().iter() {
        let channel = *channel;
        if config.queue_url(channel).is_none() {
            continue;
        }
        let queue: Arc<InMemoryQueue> = Arc::new(InMemoryQueue::new(
            format!("courier-{}", channel),
            config.visibility_timeout,
            config.max_receive_count,
        ));
        queues = queues.with(channel, queue.clone() as Arc<dyn WorkQueue>);

        let processor = ChannelProcessor::new(
            queue as Arc<dyn WorkQueue>,
            state_store.clone(),
            secret_store.clone(),
            llm.clone(),
            senders.clone(),
            alerts.clone(),
            settings.clone(),
        );
        let mut shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            log::info!("processor loop started for channel '{}'", channel);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    result = processor.run_once(10) => match result {
                        Ok(outcomes) if outcomes.is_empty() => {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("poll loop error on channel '{}': {}", channel, e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    },
                }
            }
            log::info!("processor loop stopped for channel '{}'", channel);
        }));
    }

    let ingress = Arc::new(IngressRouter::new(
        config_store,
        queues,
        config.router_version.clone(),
    ));
    let bind_addr: SocketAddr = std::env::var("COURIER_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    tokio::select! {
        result = router::serve(bind_addr, ingress) => {
            if let Err(e) = result {
                log::error!("ingress server exited: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
    }

    // Stop the poll loops and let in-flight pipelines wind down their
    // heartbeats before the process exits.
    let _ = shutdown_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }

    Ok(())
}
