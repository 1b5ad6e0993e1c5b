use crate::stream::ServerError;

/// Failures of the HTTP/SSE transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error! status: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("SSE event exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("invalid agent endpoint: {0}")]
    Endpoint(String),
}

/// Why a turn ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("Authorization failed: token is not defined")]
    CredentialMissing,
    #[error("Failed to connect to agent API: {0}")]
    Transport(#[from] TransportError),
    #[error("agent reported an error: {0}")]
    ServerReported(ServerError),
    #[error("turn cancelled")]
    Cancelled,
}
