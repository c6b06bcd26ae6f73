use thiserror::Error;

use crate::traits::ServiceError;

/// Errors from the AniList API client.
#[derive(Debug, Error)]
pub enum AniListError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("GraphQL error: {0}")]
    GraphQL(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ServiceError for AniListError {
    fn is_unauthorized(&self) -> bool {
        match self {
            Self::Api { status: 401, .. } => true,
            // AniList answers a revoked token with 400 "Invalid token".
            Self::Api { status: 400, message } => message.contains("Invalid token"),
            _ => false,
        }
    }
}
