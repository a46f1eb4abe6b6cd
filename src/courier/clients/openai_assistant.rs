//! OpenAI Assistants API client.
//!
//! Implements the LLM side of the pipeline against the threads/runs surface:
//! create a thread, append the serialized Context Object as the first user
//! message, start a run with the tenant's assistant id, poll the run to a
//! terminal state within the caller's budget, then fetch the assistant reply.
//!
//! Each operation is a narrow inherent method making one wire call; the
//! [`AssistantRunner`] impl strings them together. The client is stateless —
//! the API key travels with every call because it is tenant-scoped, resolved
//! from the secret store per message.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier::clients::openai_assistant::OpenAiAssistantClient;
//! use courier::providers::{AssistantRunner, PollPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAiAssistantClient::new();
//!     let exchange = client
//!         .run_to_completion(
//!             &std::env::var("OPENAI_API_KEY")?,
//!             "asst_abc123",
//!             "{\"hello\":\"world\"}",
//!             &PollPolicy::default(),
//!         )
//!         .await?;
//!     println!("thread {} replied: {}", exchange.thread_id, exchange.reply);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;

use crate::courier::clients::http_pool::get_shared_http_client;
use crate::courier::providers::{
    AssistantExchange, AssistantRunner, LlmError, PollPolicy, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Run statuses that mean "keep polling".
const PENDING_STATUSES: [&str; 3] = ["queued", "in_progress", "cancelling"];

/// A snapshot of a run's state from one status poll.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub status: String,
    pub usage: Option<TokenUsage>,
}

/// Thin client for the Assistants threads/runs API.
pub struct OpenAiAssistantClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiAssistantClient {
    /// Construct a client against the public API endpoint.
    pub fn new() -> Self {
        Self::new_with_base_url(DEFAULT_BASE_URL)
    }

    /// Construct a client against an alternative base URL (compatible
    /// self-hosted deployments, test servers). No trailing slash.
    pub fn new_with_base_url(base_url: &str) -> Self {
        Self {
            http: get_shared_http_client().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a fresh conversation thread; returns its id.
    pub async fn create_thread(&self, api_key: &str) -> Result<String, LlmError> {
        let body = self
            .post_json(api_key, "/threads", json!({}))
            .await?;
        require_str(&body, "id").map(|s| s.to_string())
    }

    /// Append a user message to a thread.
    pub async fn add_user_message(
        &self,
        api_key: &str,
        thread_id: &str,
        content: &str,
    ) -> Result<(), LlmError> {
        let path = format!("/threads/{}/messages", thread_id);
        self.post_json(api_key, &path, json!({"role": "user", "content": content}))
            .await?;
        Ok(())
    }

    /// Start an assistant run on a thread; returns the run id.
    pub async fn create_run(
        &self,
        api_key: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<String, LlmError> {
        let path = format!("/threads/{}/runs", thread_id);
        let body = self
            .post_json(api_key, &path, json!({"assistant_id": assistant_id}))
            .await?;
        require_str(&body, "id").map(|s| s.to_string())
    }

    /// Poll a run's current status and token usage.
    pub async fn run_status(
        &self,
        api_key: &str,
        thread_id: &str,
        run_id: &str,
    ) -> Result<RunSnapshot, LlmError> {
        let path = format!("/threads/{}/runs/{}", thread_id, run_id);
        let body = self.get_json(api_key, &path).await?;
        let status = require_str(&body, "status")?.to_string();
        let usage = body.get("usage").and_then(parse_usage);
        Ok(RunSnapshot { status, usage })
    }

    /// Fetch the text of the newest assistant message on a thread.
    pub async fn latest_assistant_message(
        &self,
        api_key: &str,
        thread_id: &str,
    ) -> Result<String, LlmError> {
        let path = format!("/threads/{}/messages?order=desc&limit=1", thread_id);
        let body = self.get_json(api_key, &path).await?;
        let message = body
            .get("data")
            .and_then(|d| d.get(0))
            .ok_or_else(|| LlmError::BadReply("thread has no messages".to_string()))?;
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        if role != "assistant" {
            return Err(LlmError::BadReply(format!(
                "newest thread message has role '{}', expected 'assistant'",
                role
            )));
        }
        message
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.get("value"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| {
                LlmError::BadReply("assistant message carries no text content".to_string())
            })
    }

    async fn post_json(
        &self,
        api_key: &str,
        path: &str,
        body: Value,
    ) -> Result<Value, LlmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("OpenAI-Beta", "assistants=v2")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        read_json(response).await
    }

    async fn get_json(&self, api_key: &str, path: &str) -> Result<Value, LlmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        read_json(response).await
    }
}

impl Default for OpenAiAssistantClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssistantRunner for OpenAiAssistantClient {
    async fn run_to_completion(
        &self,
        api_key: &str,
        assistant_id: &str,
        initial_message: &str,
        poll: &PollPolicy,
    ) -> Result<AssistantExchange, LlmError> {
        let started = Instant::now();

        let thread_id = self.create_thread(api_key).await?;
        self.add_user_message(api_key, &thread_id, initial_message)
            .await?;
        let run_id = self.create_run(api_key, &thread_id, assistant_id).await?;

        let mut usage = None;
        loop {
            if started.elapsed() > poll.budget {
                return Err(LlmError::Timeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(poll.interval).await;

            let snapshot = self.run_status(api_key, &thread_id, &run_id).await?;
            if PENDING_STATUSES.iter().any(|s| *s == snapshot.status) {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!(
                        "run {} on thread {} still {}, {} ms elapsed",
                        run_id,
                        thread_id,
                        snapshot.status,
                        started.elapsed().as_millis()
                    );
                }
                continue;
            }
            if snapshot.status == "completed" {
                usage = snapshot.usage;
                break;
            }
            return Err(LlmError::RunFailed {
                status: snapshot.status,
            });
        }

        let reply = self.latest_assistant_message(api_key, &thread_id).await?;
        Ok(AssistantExchange {
            thread_id,
            reply,
            usage,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, LlmError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| LlmError::Transport(e.to_string()))?;
    if !status.is_success() {
        if log::log_enabled!(log::Level::Error) {
            log::error!("assistants api returned http {}: {}", status, text);
        }
        return Err(LlmError::Api {
            status: status.as_u16(),
            detail: text,
        });
    }
    serde_json::from_str(&text).map_err(|e| LlmError::BadReply(format!("invalid json: {}", e)))
}

fn require_str<'a>(body: &'a Value, field: &str) -> Result<&'a str, LlmError> {
    body.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::BadReply(format!("response missing '{}'", field)))
}

fn parse_usage(value: &Value) -> Option<TokenUsage> {
    let input_tokens = value.get("prompt_tokens").and_then(Value::as_u64)?;
    let output_tokens = value.get("completion_tokens").and_then(Value::as_u64)?;
    let total_tokens = value
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(input_tokens + output_tokens);
    Some(TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_parses_and_totals_fall_back_to_the_sum() {
        let full = json!({"prompt_tokens": 420, "completion_tokens": 31, "total_tokens": 451});
        let usage = parse_usage(&full).unwrap();
        assert_eq!(usage.total_tokens, 451);

        let partial = json!({"prompt_tokens": 10, "completion_tokens": 5});
        let usage = parse_usage(&partial).unwrap();
        assert_eq!(usage.total_tokens, 15);

        assert!(parse_usage(&json!({"prompt_tokens": 10})).is_none());
    }

    #[test]
    fn missing_fields_surface_as_bad_reply() {
        let err = require_str(&json!({"object": "thread"}), "id").unwrap_err();
        match err {
            LlmError::BadReply(detail) => assert!(detail.contains("'id'")),
            other => panic!("expected BadReply, got {}", other),
        }
    }
}
