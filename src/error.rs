//! The gateway's error taxonomy and wire envelope.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Abstract error kind, per the wire taxonomy. Each kind maps to exactly one
/// HTTP status and one `type` string in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    Validation,
    RateLimit,
    Provider,
    Internal,
    NotFound,
    BadRequest,
}

impl ErrorKind {
    pub fn http_status(self) -> http::StatusCode {
        match self {
            Self::Auth => http::StatusCode::UNAUTHORIZED,
            Self::Validation => http::StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
            Self::Provider => http::StatusCode::BAD_GATEWAY,
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => http::StatusCode::NOT_FOUND,
            Self::BadRequest => http::StatusCode::BAD_REQUEST,
        }
    }

    pub fn wire_type(self) -> &'static str {
        match self {
            Self::Auth => "auth_error",
            Self::Validation => "validation_error",
            Self::RateLimit => "rate_limit_error",
            Self::Provider => "provider_error",
            Self::Internal => "internal_error",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
        }
    }
}

/// How a provider-call failure is classified for failover purposes.
/// Distinct from [`ErrorKind`]: this drives whether the orchestrator advances
/// to the next candidate provider, not what status code reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    RateLimit,
    Timeout,
    ServerError,
    CircuitOpen,
    Auth,
    Other,
}

impl ProviderErrorKind {
    /// Only these kinds trigger failover to the next candidate; `Auth` and
    /// `Other` are returned to the client as-is, since they likely indicate
    /// misconfiguration rather than transient upstream trouble.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Timeout | Self::ServerError | Self::CircuitOpen)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::CircuitOpen => "circuit_open",
            Self::Auth => "auth",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified gateway error. Carries a `cause` for internal logging that is
/// never serialized onto the wire.
#[derive(Debug)]
pub struct HapaxError {
    pub kind: ErrorKind,
    pub message: String,
    pub request_id: String,
    pub details: Value,
    pub suggestion: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HapaxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id: request_id.into(),
            details: Value::Null,
            suggestion: None,
            cause: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn auth(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message, request_id)
    }

    pub fn validation(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, request_id)
    }

    pub fn rate_limit(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message, request_id)
    }

    pub fn provider(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, message, request_id)
    }

    pub fn internal(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message, request_id)
    }

    pub fn not_found(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message, request_id)
    }

    pub fn bad_request(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message, request_id)
    }

    pub fn http_status(&self) -> http::StatusCode {
        self.kind.http_status()
    }

    /// The JSON wire envelope. `cause` is intentionally absent.
    pub fn envelope(&self) -> ErrorEnvelope<'_> {
        ErrorEnvelope {
            r#type: self.kind.wire_type(),
            message: &self.message,
            request_id: &self.request_id,
            details: if self.details.is_null() { None } else { Some(&self.details) },
            suggestion: self.suggestion.as_deref(),
        }
    }
}

impl fmt::Display for HapaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind.wire_type(), self.request_id, self.message)
    }
}

impl std::error::Error for HapaxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Shape serialized onto the wire. `cause` never appears here.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub r#type: &'a str,
    pub message: &'a str,
    pub request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_elides_cause() {
        let err = HapaxError::internal("req-1", "boom")
            .with_cause(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let json = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(json["type"], "internal_error");
        assert!(json.get("cause").is_none());
        assert!(err.source().is_some());
    }

    #[test]
    fn kind_maps_to_expected_status() {
        assert_eq!(ErrorKind::Validation.http_status(), http::StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ErrorKind::RateLimit.http_status(), http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::Provider.http_status(), http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn only_four_provider_kinds_are_retryable() {
        assert!(ProviderErrorKind::RateLimit.is_retryable());
        assert!(ProviderErrorKind::Timeout.is_retryable());
        assert!(ProviderErrorKind::ServerError.is_retryable());
        assert!(ProviderErrorKind::CircuitOpen.is_retryable());
        assert!(!ProviderErrorKind::Auth.is_retryable());
        assert!(!ProviderErrorKind::Other.is_retryable());
    }

    #[test]
    fn details_omitted_when_empty() {
        let err = HapaxError::bad_request("req-2", "nope");
        let json = serde_json::to_value(err.envelope()).unwrap();
        assert!(json.get("details").is_none());
    }
}
