//! Error types for brokerage calls.
//!
//! Every remote operation returns a [`BrokerError`]. The request executor
//! decides whether to retry by looking at the error's [`ErrorClass`].

use thiserror::Error;

/// Message fragment the brokerage uses for throttled requests.
const RATE_LIMIT_MARKER: &str = "too many requests";

/// Message fragments for requests that will never succeed on retry.
const PERMANENT_MARKERS: &[&str] = &["subscription does not permit"];

/// Message fragment for an order whose client id the brokerage already holds.
const DUPLICATE_ORDER_MARKER: &str = "client_order_id must be unique";

/// Errors returned by brokerage operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// API request failed.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from API.
        message: String,
    },

    /// Brokerage throttled the request.
    #[error("too many requests")]
    RateLimit {
        /// Seconds to wait before retry, if the brokerage said.
        retry_after_secs: Option<u64>,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request parameters, rejected before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// How the request executor treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Throttled: penalise the limiter, back off, retry.
    RateLimited,
    /// Will not succeed on retry (e.g. missing data subscription).
    Permanent,
    /// The brokerage already holds an order with this client id, so an
    /// earlier attempt went through even if its response was lost.
    Duplicate,
    /// Anything else: back off and retry.
    Transient,
}

impl ErrorClass {
    /// Classifies an error message, case-insensitively.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains(RATE_LIMIT_MARKER) {
            Self::RateLimited
        } else if lower.contains(DUPLICATE_ORDER_MARKER) {
            Self::Duplicate
        } else if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Permanent
        } else {
            Self::Transient
        }
    }
}

impl BrokerError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    #[must_use]
    pub const fn rate_limit(retry_after_secs: Option<u64>) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    /// Returns the retry class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimit { .. } | Self::Api { status_code: 429, .. } => ErrorClass::RateLimited,
            Self::InvalidRequest(_) => ErrorClass::Permanent,
            other => ErrorClass::from_message(&other.to_string()),
        }
    }

    /// Returns true if the executor should retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::RateLimited | ErrorClass::Transient)
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for brokerage operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Classification Tests ====================

    #[test]
    fn test_rate_limit_message_is_case_insensitive() {
        assert_eq!(
            ErrorClass::from_message("429 Too Many Requests"),
            ErrorClass::RateLimited
        );
        assert_eq!(
            ErrorClass::from_message("TOO MANY REQUESTS"),
            ErrorClass::RateLimited
        );
    }

    #[test]
    fn test_subscription_message_is_permanent() {
        assert_eq!(
            ErrorClass::from_message("subscription does not permit querying recent SIP data"),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_duplicate_client_order_id_is_its_own_class() {
        let err = BrokerError::api(422, "client_order_id must be unique");
        assert_eq!(err.class(), ErrorClass::Duplicate);
        assert!(!err.is_retryable());

        assert_eq!(
            ErrorClass::from_message("Client_Order_ID must be unique"),
            ErrorClass::Duplicate
        );
    }

    #[test]
    fn test_other_messages_are_transient() {
        assert_eq!(ErrorClass::from_message("connection reset"), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_message(""), ErrorClass::Transient);
    }

    #[test]
    fn test_rate_limit_variant_classifies() {
        assert_eq!(BrokerError::rate_limit(Some(3)).class(), ErrorClass::RateLimited);
        assert_eq!(BrokerError::rate_limit(None).class(), ErrorClass::RateLimited);
        assert_eq!(BrokerError::api(429, "slow down").class(), ErrorClass::RateLimited);
    }

    #[test]
    fn test_api_error_message_drives_class() {
        let err = BrokerError::api(403, "subscription does not permit querying this feed");
        assert_eq!(err.class(), ErrorClass::Permanent);

        let err = BrokerError::api(500, "internal server error");
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_network_and_timeout_are_transient() {
        assert_eq!(BrokerError::Network("refused".into()).class(), ErrorClass::Transient);
        assert_eq!(BrokerError::Timeout("10s".into()).class(), ErrorClass::Transient);
    }

    #[test]
    fn test_invalid_request_is_permanent() {
        let err = BrokerError::InvalidRequest("bad symbol".into());
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    // ==================== Display Tests ====================

    #[test]
    fn test_error_display() {
        let err = BrokerError::api(400, "bad request");
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("bad request"));

        let err = BrokerError::rate_limit(Some(60));
        assert_eq!(err.to_string(), "too many requests");
    }
}
