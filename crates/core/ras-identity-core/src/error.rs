use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Unknown broker: {0}")]
    UnknownBroker(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid broker options: {0}")]
    InvalidOptions(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),
}

pub type IdentityResult<T> = Result<T, IdentityError>;
