use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("no purchase found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("incorrect keys")]
    InvalidKeys,

    #[error("reward already claimed")]
    AlreadyClaimed,

    #[error("claim window has expired")]
    ClaimExpired,

    #[error("configuration error: {0}")]
    Config(&'static str),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClaimError {
    /// Expired and malformed claim tokens are deliberately indistinguishable
    /// to the caller.
    pub fn invalid_token() -> Self {
        ClaimError::InvalidInput("invalid or expired claim token")
    }
}

impl From<bincode::Error> for ClaimError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ClaimError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ClaimError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}
