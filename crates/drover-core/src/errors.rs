use std::time::Duration;

/// Errors raised by a session (one protocol connection owned by an agent).
///
/// Network-class errors (reset, timeout) end the agent without a replacement;
/// everything else is treated like a normal session end.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("connection reset")]
    ConnectionReset,
    #[error("connection timed out")]
    TimedOut,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("session is closed")]
    Closed,
    #[error("session has not spawned yet")]
    NotReady,
    #[error("failed to create session: {0}")]
    Create(String),
}

impl SessionError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::ConnectionReset | Self::TimedOut)
    }

    /// Map a socket error code as reported by the session layer.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        match code {
            "ECONNRESET" => Self::ConnectionReset,
            "ETIMEDOUT" => Self::TimedOut,
            _ => Self::Protocol(message.into()),
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::TimedOut => "timed_out",
            Self::Protocol(_) => "protocol",
            Self::Closed => "closed",
            Self::NotReady => "not_ready",
            Self::Create(_) => "create",
        }
    }
}

/// Typed error hierarchy for calls to the advisory completion service.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AdvisoryError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("advisory service not configured")]
    NotConfigured,
}

impl AdvisoryError {
    /// Only rate-limit failures trip the shared circuit breaker.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::MalformedResponse(_) => "malformed_response",
            Self::CircuitOpen => "circuit_open",
            Self::NotConfigured => "not_configured",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// A rejected configuration value. The previous value stays in effect.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("intensity must be an integer between 1 and 10, got {0}")]
    InvalidIntensity(String),
    #[error("unknown mode: {0}")]
    UnknownMode(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid count: {0}")]
    InvalidCount(String),
    #[error("invalid join delay: {0}")]
    InvalidJoinDelay(String),
}

impl ConfigError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidIntensity(_) => "intensity",
            Self::UnknownMode(_) => "mode",
            Self::InvalidPort(_) => "port",
            Self::InvalidCount(_) => "count",
            Self::InvalidJoinDelay(_) => "joinDelay",
        }
    }
}
