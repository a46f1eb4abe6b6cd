//! Ingress router: the HTTP-triggered orchestrator.
//!
//! `POST /initiate-conversation` carries a conversation-initiation request.
//! The router validates it, performs exactly one config-store read, builds
//! the immutable Context Object, resolves the channel's work queue and
//! enqueues — then answers the client. Nothing downstream (state store,
//! secrets, LLM, provider) is touched here; the client's `200` means "your
//! request reached the queue", no more.
//!
//! The router deliberately does not deduplicate by `request_id`: duplicate
//! submissions flow through to the queue and are fenced by the processor's
//! conditional state insert.

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::courier::channel::ChannelMethod;
use crate::courier::context::build_context;
use crate::courier::error::{ErrorCode, IngressError};
use crate::courier::queue::WorkQueue;
use crate::courier::request::InitiateRequest;
use crate::courier::tenant::{ConfigStore, ProjectStatus};

/// Per-channel work-queue bindings.
#[derive(Clone, Default)]
pub struct ChannelQueues {
    whatsapp: Option<Arc<dyn WorkQueue>>,
    sms: Option<Arc<dyn WorkQueue>>,
    email: Option<Arc<dyn WorkQueue>>,
}

impl ChannelQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `queue` as the work queue for `channel`.
    pub fn with(mut self, channel: ChannelMethod, queue: Arc<dyn WorkQueue>) -> Self {
        match channel {
            ChannelMethod::Whatsapp => self.whatsapp = Some(queue),
            ChannelMethod::Sms => self.sms = Some(queue),
            ChannelMethod::Email => self.email = Some(queue),
        }
        self
    }

    /// The queue bound to `channel`, if any.
    pub fn resolve(&self, channel: ChannelMethod) -> Option<&Arc<dyn WorkQueue>> {
        match channel {
            ChannelMethod::Whatsapp => self.whatsapp.as_ref(),
            ChannelMethod::Sms => self.sms.as_ref(),
            ChannelMethod::Email => self.email.as_ref(),
        }
    }
}

/// Status + body pair handed back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct IngressResponse {
    pub status: u16,
    pub body: Value,
}

/// The HTTP-triggered orchestrator for the enqueue path.
pub struct IngressRouter {
    config_store: Arc<dyn ConfigStore>,
    queues: ChannelQueues,
    router_version: String,
}

impl IngressRouter {
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        queues: ChannelQueues,
        router_version: impl Into<String>,
    ) -> Self {
        Self {
            config_store,
            queues,
            router_version: router_version.into(),
        }
    }

    /// The single ingress operation: validate, enrich, enqueue, respond.
    pub async fn initiate(&self, raw_body: &str) -> IngressResponse {
        match self.initiate_inner(raw_body).await {
            Ok(body) => IngressResponse { status: 200, body },
            Err(e) => {
                let status = e.code.http_status();
                if status >= 500 {
                    log::error!("initiate failed: {}", e);
                } else if log::log_enabled!(log::Level::Warn) {
                    log::warn!("initiate rejected: {}", e);
                }
                IngressResponse {
                    status,
                    body: e.body(),
                }
            }
        }
    }

    async fn initiate_inner(&self, raw_body: &str) -> Result<Value, IngressError> {
        let (payload, channel) = InitiateRequest::parse_and_validate(raw_body)?;
        let company_id = &payload.company_data.company_id;
        let project_id = &payload.company_data.project_id;

        // Exactly one config read per request.
        let tenant = self
            .config_store
            .fetch(company_id, project_id)
            .await
            .map_err(|e| IngressError::new(ErrorCode::InternalError, e.to_string()))?
            .ok_or_else(|| {
                IngressError::new(
                    ErrorCode::CompanyNotFound,
                    format!("no configuration for {}/{}", company_id, project_id),
                )
            })?;

        if tenant.project_status != ProjectStatus::Active {
            return Err(IngressError::new(
                ErrorCode::ProjectInactive,
                format!("project {}/{} is inactive", company_id, project_id),
            ));
        }
        if !tenant.allows(channel) {
            return Err(IngressError::new(
                ErrorCode::ChannelNotAllowed,
                format!(
                    "channel '{}' is not allowed for project {}/{}",
                    channel, company_id, project_id
                ),
            ));
        }
        // Channel block presence is checked by the builder, which needs it
        // anyway.
        let context = build_context(&payload, channel, &tenant, &self.router_version)?;

        let queue = self.queues.resolve(channel).ok_or_else(|| {
            IngressError::new(
                ErrorCode::ConfigurationError,
                format!("no work queue configured for channel '{}'", channel),
            )
        })?;

        let serialized = serde_json::to_string(&context)
            .map_err(|e| IngressError::new(ErrorCode::InternalError, e.to_string()))?;
        let mut attributes = HashMap::new();
        attributes.insert("company_id".to_string(), company_id.clone());
        attributes.insert("project_id".to_string(), project_id.clone());
        attributes.insert("channel_method".to_string(), channel.as_str().to_string());

        let message_id = queue.send(serialized, attributes).await.map_err(|e| {
            IngressError::new(
                ErrorCode::SqsSendError,
                format!("failed to enqueue context object: {}", e),
            )
        })?;

        let conversation_id = &context.conversation_data.conversation_id;
        log::info!(
            "enqueued conversation {} on channel '{}' (message {})",
            conversation_id,
            channel,
            message_id
        );

        Ok(json!({
            "status": "success",
            "request_id": payload.request_data.request_id,
            "conversation_id": conversation_id,
        }))
    }
}

const CORS_METHODS: &str = "POST, OPTIONS";
const CORS_HEADERS: &str = "content-type, x-api-key";

/// Build the axum router exposing the ingress route with permissive CORS.
pub fn http_router(router: Arc<IngressRouter>) -> Router {
    let initiate_router = router.clone();
    Router::new().route(
        "/initiate-conversation",
        post(move |body: String| {
            let router = initiate_router.clone();
            async move {
                let out = router.initiate(&body).await;
                let status =
                    StatusCode::from_u16(out.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (
                    status,
                    [("access-control-allow-origin", "*")],
                    Json(out.body),
                )
            }
        })
        .options(|| async {
            (
                StatusCode::NO_CONTENT,
                [
                    ("access-control-allow-origin", "*"),
                    ("access-control-allow-methods", CORS_METHODS),
                    ("access-control-allow-headers", CORS_HEADERS),
                ],
            )
        }),
    )
}

/// Bind and serve the ingress until the server task ends.
pub async fn serve(addr: SocketAddr, router: Arc<IngressRouter>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    log::info!("ingress listening on {}", local);
    axum::serve(listener, http_router(router)).await
}
