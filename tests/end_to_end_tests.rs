//! Full-path tests: HTTP ingress through the queue into the processor, with
//! scripted LLM and provider collaborators.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use courier::alert::{AlertSink, CriticalAlert};
use courier::channel::ChannelMethod;
use courier::processor::{ChannelProcessor, ChannelSenders, MessageDisposition, ProcessorSettings};
use courier::providers::{
    AssistantExchange, AssistantRunner, LlmError, PollPolicy, ProviderError, TemplateSend,
    TemplateSender, TokenUsage,
};
use courier::queue::{InMemoryQueue, WorkQueue};
use courier::router::{http_router, ChannelQueues, IngressRouter};
use courier::secrets::{InMemorySecretStore, ProviderSecret, SecretStore};
use courier::state::{ConversationKey, ConversationStatus, InMemoryStateStore, StateStore};
use courier::tenant::{InMemoryConfigStore, TenantRecord};

struct EchoAssistant;

#[async_trait]
impl AssistantRunner for EchoAssistant {
    async fn run_to_completion(
        &self,
        _api_key: &str,
        _assistant_id: &str,
        _initial_message: &str,
        _poll: &PollPolicy,
    ) -> Result<AssistantExchange, LlmError> {
        Ok(AssistantExchange {
            thread_id: "thread_e2e".to_string(),
            reply: json!({"first_name": "Alex", "body": "Welcome aboard!"}).to_string(),
            usage: Some(TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
                total_tokens: 120,
            }),
            elapsed_ms: 3,
        })
    }
}

struct CountingSender {
    sends: AtomicU32,
}

#[async_trait]
impl TemplateSender for CountingSender {
    async fn send_template(
        &self,
        credentials: &ProviderSecret,
        _send: &TemplateSend,
    ) -> Result<String, ProviderError> {
        assert_eq!(credentials.template_id(), "HX456");
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("SM{:08}", n))
    }
}

struct NoAlerts;

#[async_trait]
impl AlertSink for NoAlerts {
    async fn critical(&self, alert: &CriticalAlert) {
        panic!("unexpected critical alert for {}", alert.conversation_id);
    }
}

fn tenant() -> TenantRecord {
    serde_json::from_value(json!({
        "company_id": "ci-aaa-001",
        "project_id": "pi-aaa-001",
        "project_status": "active",
        "allowed_channels": ["whatsapp"],
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
        }
    }))
    .unwrap()
}

fn request_body() -> String {
    json!({
        "company_data": {"company_id": "ci-aaa-001", "project_id": "pi-aaa-001"},
        "recipient_data": {"recipient_tel": "+447123456789", "comms_consent": true},
        "request_data": {
            "request_id": "req-001",
            "channel_method": "whatsapp",
            "initial_request_timestamp": "2026-03-01T10:00:00Z"
        }
    })
    .to_string()
}

struct Stack {
    app: axum::Router,
    queue: Arc<InMemoryQueue>,
    state: Arc<InMemoryStateStore>,
    sender: Arc<CountingSender>,
    processor: ChannelProcessor,
}

async fn stack() -> Stack {
    let config_store = InMemoryConfigStore::new();
    config_store.insert(tenant()).await;

    let secrets = InMemorySecretStore::new();
    secrets
        .insert("secrets/ci-aaa-001/llm", json!({"ai_api_key": "sk-test"}))
        .await;
    secrets
        .insert(
            "secrets/ci-aaa-001/twilio",
            json!({
                "twilio_account_sid": "AC123",
                "twilio_auth_token": "token",
                "twilio_template_sid": "HX456"
            }),
        )
        .await;

    let queue = Arc::new(InMemoryQueue::new(
        "courier-whatsapp",
        Duration::from_secs(900),
        3,
    ));
    let state = Arc::new(InMemoryStateStore::new());
    let sender = Arc::new(CountingSender {
        sends: AtomicU32::new(0),
    });

    let router = Arc::new(IngressRouter::new(
        Arc::new(config_store),
        ChannelQueues::new().with(ChannelMethod::Whatsapp, queue.clone() as Arc<dyn WorkQueue>),
        "0.1.0",
    ));

    let processor = ChannelProcessor::new(
        queue.clone() as Arc<dyn WorkQueue>,
        state.clone() as Arc<dyn StateStore>,
        Arc::new(secrets) as Arc<dyn SecretStore>,
        Arc::new(EchoAssistant) as Arc<dyn AssistantRunner>,
        ChannelSenders::new(
            sender.clone() as Arc<dyn TemplateSender>,
            sender.clone() as Arc<dyn TemplateSender>,
        ),
        Arc::new(NoAlerts) as Arc<dyn AlertSink>,
        ProcessorSettings {
            processor_version: "0.1.0".to_string(),
            heartbeat_interval: Duration::from_secs(240),
            heartbeat_extension: Duration::from_secs(900),
            poll: PollPolicy::default(),
        },
    );

    Stack {
        app: http_router(router),
        queue,
        state,
        sender,
        processor,
    }
}

async fn post_initiate(app: &axum::Router, body: String) -> (u16, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/initiate-conversation")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn one_request_travels_the_whole_path() {
    let stack = stack().await;

    let (status, body) = post_initiate(&stack.app, request_body()).await;
    assert_eq!(status, 200);
    let conversation_id = body["conversation_id"].as_str().unwrap().to_string();
    assert_eq!(
        conversation_id,
        "ci-aaa-001#pi-aaa-001#req-001#447123456789"
    );

    let outcomes = stack.processor.run_once(10).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].disposition, MessageDisposition::Sent));

    let key = ConversationKey::new("+447123456789", conversation_id);
    let record = stack.state.fetch(&key).await.unwrap().unwrap();
    assert_eq!(
        record.conversation_status,
        ConversationStatus::InitialMessageSent
    );
    assert_eq!(record.task_complete, 1);
    assert_eq!(record.router_version, "0.1.0");
    assert_eq!(record.messages.len(), 1);
    assert_eq!(stack.sender.sends.load(Ordering::SeqCst), 1);
    assert_eq!(stack.queue.depth(), 0);
}

#[tokio::test]
async fn back_to_back_duplicates_produce_one_send() {
    let stack = stack().await;

    let (first_status, first) = post_initiate(&stack.app, request_body()).await;
    let (second_status, second) = post_initiate(&stack.app, request_body()).await;
    assert_eq!(first_status, 200);
    assert_eq!(second_status, 200);
    assert_eq!(first["conversation_id"], second["conversation_id"]);
    assert_eq!(stack.queue.depth(), 2);

    let outcomes = stack.processor.run_once(10).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    let sent = outcomes
        .iter()
        .filter(|o| matches!(o.disposition, MessageDisposition::Sent))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o.disposition, MessageDisposition::Duplicate))
        .count();
    assert_eq!(sent, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(stack.sender.sends.load(Ordering::SeqCst), 1);
    assert_eq!(stack.queue.depth(), 0);

    // One record, one history entry.
    let key = ConversationKey::new(
        "+447123456789",
        first["conversation_id"].as_str().unwrap(),
    );
    let record = stack.state.fetch(&key).await.unwrap().unwrap();
    assert_eq!(record.messages.len(), 1);
}

#[tokio::test]
async fn refused_consent_leaves_no_trace_anywhere() {
    let stack = stack().await;
    let mut body: Value = serde_json::from_str(&request_body()).unwrap();
    body["recipient_data"]["comms_consent"] = json!(false);

    let (status, response) = post_initiate(&stack.app, body.to_string()).await;
    assert_eq!(status, 400);
    assert_eq!(response["error_code"], "CONSENT_REQUIRED");

    // No queue message, and therefore nothing for the processor to create
    // state from.
    assert_eq!(stack.queue.depth(), 0);
    let outcomes = stack.processor.run_once(10).await.unwrap();
    assert!(outcomes.is_empty());
    let key = ConversationKey::new(
        "+447123456789",
        "ci-aaa-001#pi-aaa-001#req-001#447123456789",
    );
    assert!(stack.state.fetch(&key).await.unwrap().is_none());
}
