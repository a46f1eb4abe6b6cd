//! Twilio content-template client for the WhatsApp and SMS channels.
//!
//! One operation: send an approved content template with variable bindings to
//! a recipient. WhatsApp recipients and senders get the `whatsapp:` address
//! prefix; SMS uses bare E.164. Credentials are tenant-scoped and travel with
//! the call.

use async_trait::async_trait;
use serde_json::Value;

use crate::courier::channel::ChannelMethod;
use crate::courier::clients::http_pool::get_shared_http_client;
use crate::courier::providers::{ProviderError, TemplateSend, TemplateSender};
use crate::courier::secrets::ProviderSecret;

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

/// Thin client for Twilio's Messages API.
pub struct TwilioClient {
    http: reqwest::Client,
    base_url: String,
}

impl TwilioClient {
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

impl Default for TwilioClient {
    fn default() -> Self {
        Self::new()
    }
}

/// WhatsApp addresses carry the `whatsapp:` prefix on both ends of the send.
fn address_for(channel: ChannelMethod, number: &str) -> String {
    match channel {
        ChannelMethod::Whatsapp => format!("whatsapp:{}", number),
        _ => number.to_string(),
    }
}

#[async_trait]
impl TemplateSender for TwilioClient {
    async fn send_template(
        &self,
        credentials: &ProviderSecret,
        send: &TemplateSend,
    ) -> Result<String, ProviderError> {
        let secret = match credentials {
            ProviderSecret::Twilio(secret) => secret,
            ProviderSecret::SendGrid(_) => {
                return Err(ProviderError::WrongCredentials(
                    "email credentials passed to the messaging client".to_string(),
                ))
            }
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, secret.twilio_account_sid
        );
        let content_variables = serde_json::to_string(&send.variables)
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let params = [
            ("To", address_for(send.channel, &send.recipient)),
            ("From", address_for(send.channel, &send.sender)),
            ("ContentSid", secret.twilio_template_sid.clone()),
            ("ContentVariables", content_variables),
        ];

        let response = self
            .http
            .post(&url)
            .basic_auth(&secret.twilio_account_sid, Some(&secret.twilio_auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!("twilio send returned http {}: {}", status, text);
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                detail: text,
            });
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Transport(format!("invalid json: {}", e)))?;
        body.get("sid")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or(ProviderError::MissingMessageId)
    }
}
