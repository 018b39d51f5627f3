//! Error types shared by the lifecycle engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why an attempt did not resolve.
///
/// Stored in [`RequestState::rejected`](crate::state::RequestState::rejected),
/// so it is plain data: cloneable, comparable and serializable.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RequestError {
    /// Sentinel raised when cancellation wins a race
    #[error("The operation was aborted.")]
    Aborted,

    /// The transport answered with a non-success envelope
    #[error("Request failed with status {status}")]
    Response {
        /// Transport status code
        status: u16,
        /// Decoded body of the failed response
        body: Value,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The transport failed before producing a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or response mapping failed
    #[error("Mapping failed: {0}")]
    Mapping(String),

    /// A cache id could not be derived
    #[error("Cache error: {0}")]
    Cache(String),

    /// A state listener failed while handling an event
    #[error("Listener failed: {0}")]
    Listener(String),
}

impl RequestError {
    /// Whether this is the abort sentinel
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<CacheError> for RequestError {
    fn from(error: CacheError) -> Self {
        Self::Cache(error.to_string())
    }
}

/// Errors from cache id derivation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The key source could not be encoded
    #[error("Failed to encode cache key: {0}")]
    Encode(String),
}

/// Invalid configuration, reported when a manager is built
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// More than one of `cache_by`, `cache_by_params` and `cache_by_args` was set
    #[error(
        "cache_by, cache_by_params and cache_by_args are mutually exclusive, got: {}",
        .0.join(", ")
    )]
    ConflictingCacheModes(Vec<&'static str>),

    /// A fetch policy name was not recognized
    #[error("Unknown fetch policy: {0}")]
    UnknownFetchPolicy(String),

    /// A concurrency limit of zero was requested
    #[error("Concurrency limit must be positive, got {0}")]
    InvalidConcurrency(u64),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_abort_sentinel() {
        assert!(RequestError::Aborted.is_abort());
        assert!(!RequestError::Transport("down".into()).is_abort());
        assert_eq!(RequestError::Aborted.to_string(), "The operation was aborted.");
    }

    #[test]
    fn test_request_error_serializes_tagged() {
        let error = RequestError::Response {
            status: 404,
            body: json!({"message": "missing"}),
        };
        let encoded = serde_json::to_value(&error).unwrap();
        assert_eq!(encoded["kind"], "response");
        assert_eq!(encoded["detail"]["status"], 404);
    }

    #[test]
    fn test_conflicting_modes_message() {
        let error = ConfigError::ConflictingCacheModes(vec!["cache_by", "cache_by_args"]);
        assert!(error.to_string().contains("cache_by, cache_by_args"));
    }
}
