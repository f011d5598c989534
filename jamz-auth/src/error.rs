use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The token request could not be sent or no response arrived (network down, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Token endpoint returned {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// A 2xx body that does not match the token payload shape.
    #[error("Malformed token response: {0}")]
    Decode(String),

    /// The shared refresh this caller waited on did not produce a token
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("No refresh token stored")]
    NoRefreshToken,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential storage error: {0}")]
    CredentialStorage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for AuthError {
    fn from(err: config::ConfigError) -> Self {
        AuthError::Configuration(err.to_string())
    }
}
