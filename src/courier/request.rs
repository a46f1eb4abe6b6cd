//! Inbound conversation-initiation payload and structural validation.
//!
//! The upstream client POSTs a JSON body with three required sections
//! (`company_data`, `recipient_data`, `request_data`) and an optional free-form
//! `project_data` map. [`InitiateRequest::parse_and_validate`] is the single
//! entry point: it parses the raw body, checks every structural rule, and
//! returns the typed payload plus the resolved [`ChannelMethod`] — or an
//! [`IngressError`] carrying the exact taxonomy code the client must see.
//!
//! Validation is fail-fast and side-effect free; nothing here touches a store
//! or a queue.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::courier::channel::ChannelMethod;
use crate::courier::error::{ErrorCode, IngressError};

/// Tenant identity section of the inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyData {
    pub company_id: String,
    pub project_id: String,
}

/// Recipient section of the inbound request.
///
/// Which identifier is required depends on the channel: phone channels need
/// `recipient_tel`, email needs `recipient_email`. Consent is always required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientData {
    #[serde(default)]
    pub recipient_first_name: Option<String>,
    #[serde(default)]
    pub recipient_last_name: Option<String>,
    #[serde(default)]
    pub recipient_tel: Option<String>,
    #[serde(default)]
    pub recipient_email: Option<String>,
    pub comms_consent: bool,
}

/// Request identity section of the inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    pub request_id: String,
    pub channel_method: String,
    pub initial_request_timestamp: String,
}

/// The validated inbound payload, echoed verbatim into the Context Object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub company_data: CompanyData,
    pub recipient_data: RecipientData,
    pub request_data: RequestData,
    #[serde(default)]
    pub project_data: Option<Value>,
}

impl InitiateRequest {
    /// Parse a raw request body and run every structural validation rule.
    ///
    /// Rules, in order:
    /// 1. body parses as a JSON object (`INVALID_REQUEST` otherwise);
    /// 2. the three required sections and their required fields are present
    ///    and correctly typed (`INVALID_REQUEST`, with a `details.missing`
    ///    list);
    /// 3. `channel_method` is a supported channel (`INVALID_CHANNEL`);
    /// 4. `comms_consent` is `true` (`CONSENT_REQUIRED`);
    /// 5. the channel-appropriate recipient identifier is present and
    ///    well-shaped — international E.164 for phone channels, a plausible
    ///    address for email (`INVALID_REQUEST`);
    /// 6. `request_id` is non-empty (`INVALID_REQUEST`).
    pub fn parse_and_validate(raw: &str) -> Result<(InitiateRequest, ChannelMethod), IngressError> {
        let body: Value = serde_json::from_str(raw).map_err(|e| {
            IngressError::new(
                ErrorCode::InvalidRequest,
                format!("request body is not valid JSON: {}", e),
            )
        })?;

        let mut missing: Vec<String> = Vec::new();

        let company_data = read_section(&body, "company_data", &mut missing);
        let recipient_data = read_section(&body, "recipient_data", &mut missing);
        let request_data = read_section(&body, "request_data", &mut missing);

        let company_id = read_str(company_data, "company_data", "company_id", &mut missing);
        let project_id = read_str(company_data, "company_data", "project_id", &mut missing);
        let request_id = read_str(request_data, "request_data", "request_id", &mut missing);
        let channel_method =
            read_str(request_data, "request_data", "channel_method", &mut missing);
        let initial_request_timestamp = read_str(
            request_data,
            "request_data",
            "initial_request_timestamp",
            &mut missing,
        );
        let comms_consent = recipient_data
            .and_then(|section| section.get("comms_consent"))
            .and_then(Value::as_bool);
        if recipient_data.is_some() && comms_consent.is_none() {
            missing.push("recipient_data.comms_consent".to_string());
        }

        if !missing.is_empty() {
            return Err(IngressError::new(
                ErrorCode::InvalidRequest,
                "required fields are missing or malformed",
            )
            .with_details(json!({ "missing": missing })));
        }

        let channel_method = channel_method.unwrap_or_default();
        let channel = ChannelMethod::parse(&channel_method).ok_or_else(|| {
            IngressError::new(
                ErrorCode::InvalidChannel,
                format!("unsupported channel_method '{}'", channel_method),
            )
        })?;

        if comms_consent != Some(true) {
            return Err(IngressError::new(
                ErrorCode::ConsentRequired,
                "recipient has not consented to communications",
            ));
        }

        let recipient_data = recipient_data.cloned().unwrap_or(Value::Null);
        let recipient: RecipientData =
            serde_json::from_value(recipient_data).map_err(|e| {
                IngressError::new(
                    ErrorCode::InvalidRequest,
                    format!("recipient_data is malformed: {}", e),
                )
            })?;

        if channel.requires_tel() {
            let tel = recipient.recipient_tel.as_deref().unwrap_or("");
            if !is_e164(tel) {
                return Err(IngressError::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "recipient_tel must be an international E.164 number for channel '{}'",
                        channel
                    ),
                ));
            }
        } else {
            let email = recipient.recipient_email.as_deref().unwrap_or("");
            if !is_plausible_email(email) {
                return Err(IngressError::new(
                    ErrorCode::InvalidRequest,
                    "recipient_email must be a valid address for channel 'email'",
                ));
            }
        }

        let request_id = request_id.unwrap_or_default();
        if request_id.trim().is_empty() {
            return Err(IngressError::new(
                ErrorCode::InvalidRequest,
                "request_id must be non-empty",
            ));
        }

        let request = InitiateRequest {
            company_data: CompanyData {
                company_id: company_id.unwrap_or_default(),
                project_id: project_id.unwrap_or_default(),
            },
            recipient_data: recipient,
            request_data: RequestData {
                request_id,
                channel_method,
                initial_request_timestamp: initial_request_timestamp.unwrap_or_default(),
            },
            project_data: body.get("project_data").cloned(),
        };

        Ok((request, channel))
    }

    /// The recipient identifier this channel delivers to: telephone for
    /// WhatsApp/SMS, email address for email.
    ///
    /// Validation guarantees presence, so the empty-string fallback is
    /// unreachable on validated payloads.
    pub fn primary_recipient(&self, channel: ChannelMethod) -> &str {
        if channel.requires_tel() {
            self.recipient_data.recipient_tel.as_deref().unwrap_or("")
        } else {
            self.recipient_data.recipient_email.as_deref().unwrap_or("")
        }
    }
}

fn read_section<'a>(body: &'a Value, name: &str, missing: &mut Vec<String>) -> Option<&'a Value> {
    match body.get(name) {
        Some(section) if section.is_object() => Some(section),
        _ => {
            missing.push(name.to_string());
            None
        }
    }
}

fn read_str(
    section: Option<&Value>,
    section_name: &str,
    field: &str,
    missing: &mut Vec<String>,
) -> Option<String> {
    let value = section?
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    if value.is_none() {
        missing.push(format!("{}.{}", section_name, field));
    }
    value
}

/// International E.164: leading `+`, then 7–15 digits, first digit non-zero.
fn is_e164(tel: &str) -> bool {
    let digits = match tel.strip_prefix('+') {
        Some(rest) => rest,
        None => return false,
    };
    digits.len() >= 7
        && digits.len() <= 15
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

/// A deliberately light address check: one `@` with non-empty local and
/// domain parts, and a dot somewhere in the domain.
fn is_plausible_email(email: &str) -> bool {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_body() -> Value {
        json!({
            "company_data": {"company_id": "ci-aaa-001", "project_id": "pi-aaa-001"},
            "recipient_data": {
                "recipient_first_name": "Alex",
                "recipient_tel": "+447123456789",
                "comms_consent": true
            },
            "request_data": {
                "request_id": "req-001",
                "channel_method": "whatsapp",
                "initial_request_timestamp": "2026-03-01T10:00:00Z"
            }
        })
    }

    #[test]
    fn accepts_a_well_formed_whatsapp_request() {
        let raw = valid_body().to_string();
        let (request, channel) = InitiateRequest::parse_and_validate(&raw).unwrap();
        assert_eq!(channel, ChannelMethod::Whatsapp);
        assert_eq!(request.company_data.company_id, "ci-aaa-001");
        assert_eq!(request.primary_recipient(channel), "+447123456789");
        assert!(request.project_data.is_none());
    }

    #[test]
    fn rejects_non_json_bodies() {
        let err = InitiateRequest::parse_and_validate("not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn reports_every_missing_field_at_once() {
        let raw = json!({"company_data": {"company_id": "ci"}}).to_string();
        let err = InitiateRequest::parse_and_validate(&raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        let missing = err.details.unwrap()["missing"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert!(missing.contains(&"company_data.project_id".to_string()));
        assert!(missing.contains(&"recipient_data".to_string()));
        assert!(missing.contains(&"request_data".to_string()));
    }

    #[test]
    fn unknown_channel_is_invalid_channel_not_invalid_request() {
        let mut body = valid_body();
        body["request_data"]["channel_method"] = json!("telegram");
        let err = InitiateRequest::parse_and_validate(&body.to_string()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidChannel);
    }

    #[test]
    fn withheld_consent_is_its_own_code() {
        let mut body = valid_body();
        body["recipient_data"]["comms_consent"] = json!(false);
        let err = InitiateRequest::parse_and_validate(&body.to_string()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConsentRequired);
    }

    #[test]
    fn phone_channels_demand_e164() {
        for bad in ["07123456789", "+0123456", "+44 7123 456789", ""].iter() {
            let mut body = valid_body();
            body["recipient_data"]["recipient_tel"] = json!(bad);
            let err = InitiateRequest::parse_and_validate(&body.to_string()).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidRequest, "tel: {:?}", bad);
        }
    }

    #[test]
    fn email_channel_demands_an_address() {
        let mut body = valid_body();
        body["request_data"]["channel_method"] = json!("email");
        let err = InitiateRequest::parse_and_validate(&body.to_string()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        body["recipient_data"]["recipient_email"] = json!("alex@example.com");
        let (_, channel) = InitiateRequest::parse_and_validate(&body.to_string()).unwrap();
        assert_eq!(channel, ChannelMethod::Email);
    }

    #[test]
    fn blank_request_id_is_rejected() {
        let mut body = valid_body();
        body["request_data"]["request_id"] = json!("   ");
        let err = InitiateRequest::parse_and_validate(&body.to_string()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn e164_boundaries() {
        assert!(is_e164("+1234567"));
        assert!(is_e164("+123456789012345"));
        assert!(!is_e164("+123456"));
        assert!(!is_e164("+1234567890123456"));
        assert!(!is_e164("+07123456789"));
    }
}
