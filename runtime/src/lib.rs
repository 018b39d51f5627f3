//! # Request Lifecycle Runtime
//!
//! Async engine for the request lifecycle.
//!
//! ## Core Components
//!
//! - **Initiator**: runs one attempt through its stages, racing each one
//!   against cancellation ([`RequestInitiator`])
//! - **Manager**: keeps a registry of attempts for one consumer, applies the
//!   concurrency limit and the cache policy, and publishes a view of the
//!   current state ([`RequestManager`])
//! - **Transport**: the pluggable operation that performs a request
//!   ([`Transport`], and [`http::HttpTransport`] behind the `http` feature)
//!
//! ## Example
//!
//! ```ignore
//! use request_lifecycle_runtime::{RequestManager, RequestOptions};
//! use serde_json::json;
//!
//! let manager = RequestManager::builder(transport)
//!     .options(RequestOptions::default().with_auto(false))
//!     .cache_by_params()
//!     .build()?;
//!
//! let handle = manager.trigger(vec![json!({ "url": "/items" })])?;
//! let state = handle.outcome().await?;
//! println!("{:?}", state.resolved);
//! ```

/// Manager options
pub mod config;

/// The attempt engine
pub mod initiator;

/// Registry of attempts bound to one consumer
pub mod manager;

/// Metric names and descriptions
pub mod metrics;

/// Transport and mapper seams
pub mod transport;

/// reqwest-backed transport
#[cfg(feature = "http")]
pub mod http;

pub use config::{CacheBucket, ConcurrentRequests, RequestOptions};
pub use error::{AttemptError, ManagerError};
pub use initiator::{Attempt, AttemptHandle, InitiatorConfig, RequestInitiator};
pub use manager::{RequestEntry, RequestManager, RequestManagerBuilder, RequestView};
pub use transport::{
    PerformContext, ProgressReporter, RequestMapper, ResponseMapper, SharedTransport, Transport,
};

/// Error types for the engine and the manager
pub mod error {
    use request_lifecycle_core::{RequestError, RequestId, RequestState};
    use thiserror::Error;

    /// Completion errors of an attempt
    ///
    /// An attempt that is aborted or rejected completes normally with its
    /// terminal state unless the matching `throw_on_*` flag is set.
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum AttemptError {
        /// The attempt was aborted and `throw_on_abortions` is set
        #[error("Request {} was aborted", display_id(.0))]
        Aborted(Box<RequestState>),

        /// The attempt was rejected and `throw_on_rejections` is set
        #[error("Request {} was rejected: {}", display_id(.0), display_reason(.0))]
        Rejected(Box<RequestState>),

        /// The listener failed while handling the rejected terminal state
        ///
        /// The attempt itself is finished; only delivery failed.
        #[error("Listener failed on terminal state: {0}")]
        Listener(RequestError),

        /// A spawned attempt panicked or was cancelled
        #[error("Attempt task failed: {0}")]
        Join(String),
    }

    impl AttemptError {
        /// Terminal state carried by the error, if any
        #[must_use]
        pub fn state(&self) -> Option<&RequestState> {
            match self {
                Self::Aborted(state) | Self::Rejected(state) => Some(state),
                Self::Listener(_) | Self::Join(_) => None,
            }
        }
    }

    fn display_id(state: &RequestState) -> String {
        state
            .request_id
            .map_or_else(|| "<none>".to_string(), |id| id.to_string())
    }

    fn display_reason(state: &RequestState) -> String {
        state
            .rejected
            .as_ref()
            .map_or_else(|| "unknown".to_string(), ToString::to_string)
    }

    /// Errors from [`RequestManager`](crate::RequestManager) operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ManagerError {
        /// The manager was torn down and accepts no new attempts
        #[error("Request manager was torn down")]
        TornDown,

        /// No registered entry has this id
        #[error("Unknown request {0}")]
        UnknownRequest(RequestId),
    }
}
