//! Error types shared across the pipeline.

use thiserror::Error;

/// Failure category reported by a weather provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    Unauthorized,
    NotFound,
    RateLimited,
    Network,
    Unknown,
}

impl ProviderErrorKind {
    /// `Unauthorized` and `NotFound` will not change on a second attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Unauthorized | Self::NotFound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not found",
            Self::RateLimited => "rate limited",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("weather provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content item not found: {0}")]
    NotFound(String),

    #[error("content item {0} already has a weather record")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("invalid reading JSON: {err}"))
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to serialize payload for '{topic}': {source}")]
    Serialization {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("broker transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("event bus is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_and_not_found_are_terminal() {
        assert!(!ProviderErrorKind::Unauthorized.is_retryable());
        assert!(!ProviderErrorKind::NotFound.is_retryable());
        assert!(ProviderErrorKind::RateLimited.is_retryable());
        assert!(ProviderErrorKind::Network.is_retryable());
        assert!(ProviderErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn provider_error_message_names_kind() {
        let err = ProviderError::new(ProviderErrorKind::NotFound, "city not found: Atlantis");
        assert_eq!(
            err.to_string(),
            "weather provider error (not found): city not found: Atlantis"
        );
    }
}
