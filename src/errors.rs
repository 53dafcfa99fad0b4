use thiserror::Error;

/// Protocol-level failures surfaced to MCP clients as JSON-RPC errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },
    #[error("internal error: {message}")]
    Internal { code: &'static str, message: String },
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

/// Failures of the JSON-RPC transport to the backend.
///
/// A JSON-RPC error object returned by a reachable backend is not a transport
/// error; it is delivered as a normal response variant. Only the transient
/// variants are eligible for retry.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to backend timed out: {message}")]
    ConnectTimeout { message: String },
    #[error("failed to connect to backend: {message}")]
    ConnectRefused { message: String },
    #[error("malformed backend response: {reason}")]
    MalformedResponse { reason: String },
}

impl TransportError {
    /// Network-level failures that a retry can plausibly recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::ConnectRefused { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::TransportError;

    #[test]
    fn transient_classification() {
        let timeout = TransportError::ConnectTimeout {
            message: "deadline elapsed".to_string(),
        };
        let refused = TransportError::ConnectRefused {
            message: "connection refused".to_string(),
        };
        let malformed = TransportError::MalformedResponse {
            reason: "unexpected http status 500".to_string(),
        };

        assert!(timeout.is_transient());
        assert!(refused.is_transient());
        assert!(!malformed.is_transient());
    }
}
