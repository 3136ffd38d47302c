use std::fmt;

/// Machine-readable error codes for diagnostics and operator tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    RealtimeUnavailable,
    TokenFetchFailed,
    EndpointInvalid,
    ConnectionFailed,
    ConnectionLost,
    DecodeFailed,
    ServerError,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::RealtimeUnavailable => "E1002",
            Self::TokenFetchFailed => "E2001",
            Self::EndpointInvalid => "E2002",
            Self::ConnectionFailed => "E3001",
            Self::ConnectionLost => "E3002",
            Self::DecodeFailed => "E4001",
            Self::ServerError => "E4002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::RealtimeUnavailable => "Realtime endpoint not configured",
            Self::TokenFetchFailed => "Token request failed",
            Self::EndpointInvalid => "Invalid realtime endpoint",
            Self::ConnectionFailed => "Connection failed",
            Self::ConnectionLost => "Connection lost",
            Self::DecodeFailed => "Frame decode failed",
            Self::ServerError => "Server reported an error",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in modsync.toml and retry."),
            Self::RealtimeUnavailable => {
                Some("Set [service] url and realtime = true to enable live assignments.")
            }
            Self::TokenFetchFailed => {
                Some("Check [token] url/audience and that the bearer credential is still valid.")
            }
            Self::EndpointInvalid => Some("Use an http(s):// or ws(s):// service url."),
            Self::ConnectionFailed | Self::ConnectionLost => {
                Some("The client reconnects automatically; check network reachability if it persists.")
            }
            Self::DecodeFailed => None,
            Self::ServerError => Some("Inspect server logs for the reported message."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures the sync client absorbs and retries.
///
/// None of these ever cross the client facade; they are logged and fed back
/// into the connection state machine as "connection error" inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("token request failed: {0}")]
    Token(String),

    #[error("invalid realtime endpoint: {0}")]
    Endpoint(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("server error: {0}")]
    Server(String),
}

impl SyncError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Token(_) => ErrorCode::TokenFetchFailed,
            Self::Endpoint(_) => ErrorCode::EndpointInvalid,
            Self::Transport(_) => ErrorCode::ConnectionFailed,
            Self::Closed => ErrorCode::ConnectionLost,
            Self::Server(_) => ErrorCode::ServerError,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
