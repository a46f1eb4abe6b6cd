//! SendGrid dynamic-template client for the email channel.
//!
//! One operation: send a dynamic template with the assistant's variable
//! bindings as `dynamic_template_data`. SendGrid acknowledges with `202
//! Accepted` and the provider message id in the `X-Message-Id` response
//! header.

use async_trait::async_trait;
use serde_json::json;

use crate::courier::clients::http_pool::get_shared_http_client;
use crate::courier::providers::{ProviderError, TemplateSend, TemplateSender};
use crate::courier::secrets::ProviderSecret;

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

/// Thin client for SendGrid's v3 mail send API.
pub struct SendGridClient {
    http: reqwest::Client,
    base_url: String,
}

impl SendGridClient {
    pub fn new() -> Self {
        Self::new_with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at an alternative endpoint (test servers). No
    /// trailing slash.
    pub fn new_with_base_url(base_url: &str) -> Self {
        Self {
            http: get_shared_http_client().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for SendGridClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateSender for SendGridClient {
    async fn send_template(
        &self,
        credentials: &ProviderSecret,
        send: &TemplateSend,
    ) -> Result<String, ProviderError> {
        let secret = match credentials {
            ProviderSecret::SendGrid(secret) => secret,
            ProviderSecret::Twilio(_) => {
                return Err(ProviderError::WrongCredentials(
                    "messaging credentials passed to the email client".to_string(),
                ))
            }
        };

        let body = json!({
            "from": {
                "email": send.sender,
                "name": secret.sendgrid_from_name,
            },
            "personalizations": [{
                "to": [{"email": send.recipient}],
                "dynamic_template_data": send.variables,
            }],
            "template_id": secret.sendgrid_template_id,
        });

        let url = format!("{}/v3/mail/send", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", secret.sendgrid_auth_value))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            if log::log_enabled!(log::Level::Error) {
                log::error!("sendgrid send returned http {}: {}", status, text);
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                detail: text,
            });
        }

        response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or(ProviderError::MissingMessageId)
    }
}
