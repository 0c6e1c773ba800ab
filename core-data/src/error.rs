use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl DataError {
    pub(crate) fn invalid(field: &str, message: String) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
