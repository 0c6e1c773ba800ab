use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("Authentication request failed: {0}")]
    Remote(String),

    #[error("Unexpected authentication response: {0}")]
    InvalidResponse(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored session is corrupted: {0}")]
    SessionCorrupted(String),

    #[error("Session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A login is already in progress")]
    LoginInProgress,

    #[error("Login timed out after {0} seconds")]
    Timeout(u64),

    #[error("Not authenticated")]
    NotAuthenticated,
}

pub type Result<T> = std::result::Result<T, AuthError>;
