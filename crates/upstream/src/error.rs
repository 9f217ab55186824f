//! Failure taxonomy surfaced to upstream-client callers.

use guru_domain::error::ErrorKind;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("timeout: {message}")]
    Timeout { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("upstream returned {status}: {message}")]
    Http4xx { status: u16, message: String },

    #[error("upstream returned {status}: {message}")]
    Http5xx { status: u16, message: String },

    #[error("circuit open for {service}/{endpoint}")]
    CircuitOpen { service: String, endpoint: String },

    #[error("call cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Project into the client-facing `error_kind` vocabulary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Network { .. } | Self::Http5xx { .. } => ErrorKind::UpstreamUnavailable,
            Self::Http4xx { .. } => ErrorKind::InvalidInput,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the retry engine may replay the attempt (idempotency
    /// permitting). 4xx is permanent; circuit_open and cancellation are
    /// final for the current call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::Http5xx { .. }
        )
    }

    /// Whether the breaker counts this outcome as a failure.
    pub fn counts_as_breaker_failure(&self) -> bool {
        self.is_transient()
    }
}

/// Classify a transport error from reqwest.
pub fn from_reqwest(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout {
            message: e.to_string(),
        }
    } else {
        UpstreamError::Network {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_projection() {
        let timeout = UpstreamError::Timeout { message: "t".into() };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let open = UpstreamError::CircuitOpen {
            service: "s".into(),
            endpoint: "e".into(),
        };
        assert_eq!(open.kind(), ErrorKind::CircuitOpen);

        let bad = UpstreamError::Http4xx { status: 404, message: "m".into() };
        assert_eq!(bad.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn transience() {
        assert!(UpstreamError::Timeout { message: "".into() }.is_transient());
        assert!(UpstreamError::Http5xx { status: 500, message: "".into() }.is_transient());
        assert!(!UpstreamError::Http4xx { status: 400, message: "".into() }.is_transient());
        assert!(!UpstreamError::Cancelled.is_transient());
        assert!(!UpstreamError::CircuitOpen {
            service: "s".into(),
            endpoint: "e".into()
        }
        .is_transient());
    }
}
