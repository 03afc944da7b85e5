use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Dialer error: {0}")]
    Dialer(String),
    #[error("A call is already in progress")]
    CallInProgress,
    #[error("Call controller is no longer running")]
    ControllerStopped,
    #[error("Telephony error: {0}")]
    Telephony(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("GraphQL error: {0}")]
    GraphQl(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Credential error: {0}")]
    Credential(String),
}
