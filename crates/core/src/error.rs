use thiserror::Error;

pub type LoyaltyResult<T> = Result<T, LoyaltyError>;

#[derive(Error, Debug)]
pub enum LoyaltyError {
    #[error("Policy validation error: {0}")]
    Validation(String),

    #[error("Invalid member input: {0}")]
    Input(String),

    #[error("Policy version conflict: expected {expected}, active is {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
