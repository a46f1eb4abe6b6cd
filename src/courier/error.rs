//! Ingress error taxonomy.
//!
//! Every failure the ingress can surface to the upstream client maps to one
//! [`ErrorCode`] with a fixed wire string and HTTP status. The response body
//! shape — `{"status": "error", "error_code": ..., "message": ..., "details"?}`
//! — is part of the external contract and must not drift.

use serde_json::{json, Value};
use std::error::Error;
use std::fmt;

/// Wire-level error codes returned by the ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Body not parseable as JSON, or required sections/fields missing or
    /// malformed.
    InvalidRequest,
    /// `comms_consent` was present but false.
    ConsentRequired,
    /// `channel_method` outside the supported enum.
    InvalidChannel,
    /// No tenant configuration row for `(company_id, project_id)`.
    CompanyNotFound,
    /// The project exists but is not active.
    ProjectInactive,
    /// The requested channel is not in the tenant's allowed set.
    ChannelNotAllowed,
    /// Tenant configuration or deployment wiring is incomplete (missing
    /// channel block, missing queue).
    ConfigurationError,
    /// The work queue rejected the enqueue.
    SqsSendError,
    /// Transient infrastructure failure outside the above classes.
    InternalError,
}

impl ErrorCode {
    /// Stable wire string for the `error_code` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ConsentRequired => "CONSENT_REQUIRED",
            ErrorCode::InvalidChannel => "INVALID_CHANNEL",
            ErrorCode::CompanyNotFound => "COMPANY_NOT_FOUND",
            ErrorCode::ProjectInactive => "PROJECT_INACTIVE",
            ErrorCode::ChannelNotAllowed => "CHANNEL_NOT_ALLOWED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::SqsSendError => "SQS_SEND_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this code is returned with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidRequest
            | ErrorCode::ConsentRequired
            | ErrorCode::InvalidChannel => 400,
            ErrorCode::ProjectInactive | ErrorCode::ChannelNotAllowed => 403,
            ErrorCode::CompanyNotFound => 404,
            ErrorCode::ConfigurationError
            | ErrorCode::SqsSendError
            | ErrorCode::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-visible ingress failure.
#[derive(Debug)]
pub struct IngressError {
    /// Taxonomy code driving the status and `error_code` field.
    pub code: ErrorCode,
    /// Human-readable explanation for the `message` field.
    pub message: String,
    /// Optional structured context (e.g. the list of missing fields).
    pub details: Option<Value>,
}

impl IngressError {
    /// Build an error with no structured details.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details to the response body.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The JSON response body for this error.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "status": "error",
            "error_code": self.code.as_str(),
            "message": self.message,
        });
        if let Some(details) = &self.details {
            body["details"] = details.clone();
        }
        body
    }
}

impl fmt::Display for IngressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl Error for IngressError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_contract() {
        assert_eq!(ErrorCode::InvalidRequest.http_status(), 400);
        assert_eq!(ErrorCode::ConsentRequired.http_status(), 400);
        assert_eq!(ErrorCode::InvalidChannel.http_status(), 400);
        assert_eq!(ErrorCode::ProjectInactive.http_status(), 403);
        assert_eq!(ErrorCode::ChannelNotAllowed.http_status(), 403);
        assert_eq!(ErrorCode::CompanyNotFound.http_status(), 404);
        assert_eq!(ErrorCode::ConfigurationError.http_status(), 500);
        assert_eq!(ErrorCode::SqsSendError.http_status(), 500);
    }

    #[test]
    fn body_includes_details_only_when_present() {
        let bare = IngressError::new(ErrorCode::InvalidRequest, "missing sections");
        assert!(bare.body().get("details").is_none());
        assert_eq!(bare.body()["status"], "error");
        assert_eq!(bare.body()["error_code"], "INVALID_REQUEST");

        let detailed = IngressError::new(ErrorCode::InvalidRequest, "missing fields")
            .with_details(json!({"missing": ["request_id"]}));
        assert_eq!(detailed.body()["details"]["missing"][0], "request_id");
    }
}
