use mq_proto::{Code, ProtoError, Status};
use thiserror::Error;

/// Numeric code reported for failures that originate in the client rather
/// than in a broker status.
pub const CLIENT_ERROR_CODE: i32 = -1;

/// Errors that can occur during consumer operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Gateway could not complete a pull: unreachable, reset or timed out
    #[error("Server[{addr}] is not reachable: {reason}")]
    ServerUnreachable { addr: String, reason: String },

    /// Gateway could not complete an offset query
    #[error("Failed to query offset from {addr}: {reason}")]
    QueryOffset { addr: String, reason: String },

    /// Gateway could not complete a route lookup
    #[error("Failed to query route for topic {topic}: {reason}")]
    RouteUnavailable { topic: String, reason: String },

    /// Broker answered with a non-OK business status
    #[error("Broker status {}({code}): {message}", code_name(.code))]
    Status { code: i32, message: String },

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A precondition upstream of this call was broken
    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Failed to sign request: {0}")]
    Signing(String),

    /// The producer side of a pending result went away without completing it
    #[error("Operation abandoned before completion")]
    Abandoned,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn code_name(code: &i32) -> &'static str {
    Code::try_from(*code).map(Code::as_str).unwrap_or("UNKNOWN")
}

impl ClientError {
    /// Numeric code for this failure: the broker's code for status errors,
    /// [`CLIENT_ERROR_CODE`] for everything raised locally.
    pub fn code(&self) -> i32 {
        match self {
            Self::Status { code, .. } => *code,
            _ => CLIENT_ERROR_CODE,
        }
    }

    /// Returns true if the same call may succeed if issued again later.
    /// Only [`crate::PullTask`] retries on its own; everything else leaves
    /// the decision to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServerUnreachable { .. }
            | Self::QueryOffset { .. }
            | Self::RouteUnavailable { .. } => true,
            Self::Status { code, .. } => Code::try_from(*code)
                .map(Code::is_transient)
                .unwrap_or(false),
            Self::Io(_) => true,
            _ => false,
        }
    }

    pub fn from_status(status: &Status) -> Self {
        Self::Status {
            code: status.code,
            message: status.message.clone(),
        }
    }
}

impl From<ProtoError> for ClientError {
    fn from(err: ProtoError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_carries_broker_code() {
        let err = ClientError::from_status(&Status::new(Code::OutOfRange, "offset too large"));
        assert_eq!(err.code(), Code::OutOfRange as i32);
        assert_eq!(
            err.to_string(),
            "Broker status OUT_OF_RANGE(11): offset too large"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unreachable_message_names_address() {
        let err = ClientError::ServerUnreachable {
            addr: "10.0.0.7:8081".into(),
            reason: "deadline exceeded".into(),
        };
        assert!(err.to_string().starts_with("Server[10.0.0.7:8081] is not reachable"));
        assert_eq!(err.code(), CLIENT_ERROR_CODE);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_query_offset_message_prefix() {
        let err = ClientError::QueryOffset {
            addr: "b1:8081".into(),
            reason: "connection refused".into(),
        };
        assert!(err.to_string().starts_with("Failed to query offset"));
    }

    #[test]
    fn test_retryable_classification() {
        let throttled = ClientError::from_status(&Status::new(Code::ResourceExhausted, "busy"));
        assert!(throttled.is_retryable());
        assert!(!ClientError::TopicNotFound("t".into()).is_retryable());
        assert!(!ClientError::InvariantViolation("x".into()).is_retryable());
        assert!(!ClientError::Abandoned.is_retryable());
    }

    #[test]
    fn test_unknown_status_code_display() {
        let err = ClientError::Status {
            code: 40_001,
            message: "custom".into(),
        };
        assert_eq!(err.to_string(), "Broker status UNKNOWN(40001): custom");
    }
}
