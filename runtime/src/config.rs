//! Manager options.
//!
//! [`RequestOptions`] holds every plain-data option and can be deserialized
//! from configuration files. Function-valued collaborators (mappers,
//! transport, cache id functions, callbacks) go through
//! [`RequestManagerBuilder`](crate::manager::RequestManagerBuilder).
//!
//! ```
//! use request_lifecycle_runtime::config::{ConcurrentRequests, RequestOptions};
//!
//! let options: RequestOptions = serde_json::from_str(
//!     r#"{ "auto": false, "concurrent_requests": 3, "fetch_policy": "cache-only" }"#,
//! ).unwrap();
//! assert!(!options.auto);
//! assert_eq!(options.concurrent_requests.limit(), Some(3));
//! ```

use request_lifecycle_core::{ConfigError, FetchPolicy, MemoryBucket, SharedCacheStore};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// How many attempts a manager keeps registered at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ConcurrencyRepr", into = "ConcurrencyRepr")]
pub enum ConcurrentRequests {
    /// One attempt; the view shows a single entry (`false`)
    #[default]
    Single,
    /// No limit (`true`)
    Unlimited,
    /// At most this many attempts (a positive integer)
    Limit(NonZeroUsize),
}

impl ConcurrentRequests {
    /// A limit of `n` attempts
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConcurrency`] when `n` is zero.
    pub fn limit_of(n: usize) -> Result<Self, ConfigError> {
        NonZeroUsize::new(n)
            .map(Self::Limit)
            .ok_or(ConfigError::InvalidConcurrency(0))
    }

    /// Maximum number of registered attempts, `None` when unlimited
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Single => Some(1),
            Self::Unlimited => None,
            Self::Limit(n) => Some(n.get()),
        }
    }

    /// Whether the view shows a single entry
    #[must_use]
    pub const fn is_single(self) -> bool {
        matches!(self, Self::Single)
    }
}

impl From<bool> for ConcurrentRequests {
    fn from(unlimited: bool) -> Self {
        if unlimited { Self::Unlimited } else { Self::Single }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum ConcurrencyRepr {
    Flag(bool),
    Count(u64),
}

impl TryFrom<ConcurrencyRepr> for ConcurrentRequests {
    type Error = ConfigError;

    fn try_from(repr: ConcurrencyRepr) -> Result<Self, Self::Error> {
        match repr {
            ConcurrencyRepr::Flag(unlimited) => Ok(unlimited.into()),
            ConcurrencyRepr::Count(n) => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Self::Limit)
                .ok_or(ConfigError::InvalidConcurrency(n)),
        }
    }
}

impl From<ConcurrentRequests> for ConcurrencyRepr {
    fn from(concurrency: ConcurrentRequests) -> Self {
        match concurrency {
            ConcurrentRequests::Single => Self::Flag(false),
            ConcurrentRequests::Unlimited => Self::Flag(true),
            ConcurrentRequests::Limit(n) => {
                Self::Count(u64::try_from(n.get()).unwrap_or(u64::MAX))
            },
        }
    }
}

/// Which cache store a manager uses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBucket {
    /// A store private to the manager
    #[default]
    Local,
    /// The process-wide [`MemoryBucket::global`] store
    Global,
    /// A caller-supplied store
    #[serde(skip)]
    Shared(SharedCacheStore),
}

impl CacheBucket {
    /// Resolve to a concrete store. `Local` creates a fresh one.
    #[must_use]
    pub fn resolve(&self) -> SharedCacheStore {
        match self {
            Self::Local => Arc::new(MemoryBucket::new()),
            Self::Global => MemoryBucket::global(),
            Self::Shared(store) => Arc::clone(store),
        }
    }
}

/// Plain-data options of a [`RequestManager`](crate::manager::RequestManager)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Trigger automatically when a plain-value request description changes
    pub auto: bool,
    /// Abort every registered attempt on teardown
    pub abort_on_unmount: bool,
    /// Abort an attempt when its entry is released
    pub abort_on_release: bool,
    /// Drop entries from the registry once they are aborted
    pub release_on_abort: bool,
    /// Store backing the cache policy, if one is configured
    pub cache_bucket: CacheBucket,
    /// Cache lookup strategy
    pub fetch_policy: FetchPolicy,
    /// Registry size limit
    pub concurrent_requests: ConcurrentRequests,
    /// Complete aborted attempts with an error
    pub throw_on_abortions: bool,
    /// Complete rejected attempts with an error
    pub throw_on_rejections: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            auto: true,
            abort_on_unmount: false,
            abort_on_release: true,
            release_on_abort: false,
            cache_bucket: CacheBucket::Local,
            fetch_policy: FetchPolicy::CacheFirst,
            concurrent_requests: ConcurrentRequests::Single,
            throw_on_abortions: false,
            throw_on_rejections: false,
        }
    }
}

impl RequestOptions {
    /// Set auto-triggering
    #[must_use]
    pub const fn with_auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    /// Set abort on teardown
    #[must_use]
    pub const fn with_abort_on_unmount(mut self, abort: bool) -> Self {
        self.abort_on_unmount = abort;
        self
    }

    /// Set abort on release
    #[must_use]
    pub const fn with_abort_on_release(mut self, abort: bool) -> Self {
        self.abort_on_release = abort;
        self
    }

    /// Set release on abort
    #[must_use]
    pub const fn with_release_on_abort(mut self, release: bool) -> Self {
        self.release_on_abort = release;
        self
    }

    /// Set the cache bucket
    #[must_use]
    pub fn with_cache_bucket(mut self, bucket: CacheBucket) -> Self {
        self.cache_bucket = bucket;
        self
    }

    /// Set the fetch policy
    #[must_use]
    pub const fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    /// Set the concurrency limit
    #[must_use]
    pub const fn with_concurrent_requests(mut self, concurrency: ConcurrentRequests) -> Self {
        self.concurrent_requests = concurrency;
        self
    }

    /// Set whether aborted attempts complete with an error
    #[must_use]
    pub const fn with_throw_on_abortions(mut self, throw: bool) -> Self {
        self.throw_on_abortions = throw;
        self
    }

    /// Set whether rejected attempts complete with an error
    #[must_use]
    pub const fn with_throw_on_rejections(mut self, throw: bool) -> Self {
        self.throw_on_rejections = throw;
        self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = RequestOptions::default();
        assert!(options.auto);
        assert!(!options.abort_on_unmount);
        assert!(options.abort_on_release);
        assert!(!options.release_on_abort);
        assert_eq!(options.fetch_policy, FetchPolicy::CacheFirst);
        assert_eq!(options.concurrent_requests, ConcurrentRequests::Single);
    }

    #[test]
    fn test_concurrency_from_bool_or_number() {
        let single: ConcurrentRequests = serde_json::from_value(json!(false)).unwrap();
        let unlimited: ConcurrentRequests = serde_json::from_value(json!(true)).unwrap();
        let two: ConcurrentRequests = serde_json::from_value(json!(2)).unwrap();

        assert_eq!(single.limit(), Some(1));
        assert!(single.is_single());
        assert_eq!(unlimited.limit(), None);
        assert_eq!(two.limit(), Some(2));
        assert!(!two.is_single());

        assert!(serde_json::from_value::<ConcurrentRequests>(json!(0)).is_err());
        assert!(ConcurrentRequests::limit_of(0).is_err());
    }

    #[test]
    fn test_concurrency_serializes_back() {
        assert_eq!(serde_json::to_value(ConcurrentRequests::Unlimited).unwrap(), json!(true));
        assert_eq!(
            serde_json::to_value(ConcurrentRequests::limit_of(4).unwrap()).unwrap(),
            json!(4)
        );
    }

    #[test]
    fn test_partial_options_keep_defaults() {
        let options: RequestOptions =
            serde_json::from_value(json!({"cache_bucket": "global", "release_on_abort": true}))
                .unwrap();
        assert!(matches!(options.cache_bucket, CacheBucket::Global));
        assert!(options.release_on_abort);
        assert!(options.auto);
    }

    #[test]
    fn test_bucket_resolution() {
        let a = CacheBucket::Global.resolve();
        let b = CacheBucket::Global.resolve();
        assert!(Arc::ptr_eq(&a, &b));

        let c = CacheBucket::Local.resolve();
        let d = CacheBucket::Local.resolve();
        assert!(!Arc::ptr_eq(&c, &d));
    }
}
