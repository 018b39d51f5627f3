//! Response caching.
//!
//! A [`CachePolicy`] decorates a [`StateListener`]. When an attempt reaches
//! `prepared` the policy looks its cache id up in a [`CacheStore`]; a hit
//! finishes the attempt with the cached response before any network stage
//! runs. Resolved states are written back under the same id.
//!
//! Cache ids come either from the request params or from the trigger
//! arguments ([`CacheKeySource`]).

use crate::error::{CacheError, ConfigError, RequestError};
use crate::helpers::RequestHelpers;
use crate::listener::{SharedListener, StateListener};
use crate::state::{RequestState, RequestStatus};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// Counter of cache lookups answered from the store
pub const CACHE_HITS: &str = "request.cache.hits";

/// Counter of cache lookups that found nothing
pub const CACHE_MISSES: &str = "request.cache.misses";

/// Counter of resolved states written to a store
pub const CACHE_WRITES: &str = "request.cache.writes";

/// Key-value store backing a cache policy.
///
/// Stores are supplied by the caller and may be shared between managers;
/// concurrent writers follow last-writer-wins.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Look up a cached state
    fn get(&self, id: &str) -> Option<RequestState>;

    /// Store `state` under `id`, replacing any previous entry
    fn set(&self, id: &str, state: RequestState);

    /// Drop the entry under `id`, returning it
    fn remove(&self, id: &str) -> Option<RequestState>;

    /// Drop every entry
    fn clear(&self);
}

/// Shared cache store handle
pub type SharedCacheStore = Arc<dyn CacheStore>;

/// In-memory [`CacheStore`].
///
/// Entries live as long as the bucket; nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    entries: RwLock<HashMap<String, RequestState>>,
}

static GLOBAL_BUCKET: LazyLock<Arc<MemoryBucket>> =
    LazyLock::new(|| Arc::new(MemoryBucket::new()));

impl MemoryBucket {
    /// Create an empty bucket
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bucket shared by every manager configured with the
    /// global cache bucket
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_BUCKET)
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the bucket holds no entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryBucket {
    fn get(&self, id: &str) -> Option<RequestState> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn set(&self, id: &str, state: RequestState) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_owned(), state);
    }

    fn remove(&self, id: &str) -> Option<RequestState> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Derives a cache id from the key source. `Ok(None)` marks the request as
/// not cacheable.
pub type CacheIdFn = Arc<dyn Fn(&Value) -> Result<Option<String>, CacheError> + Send + Sync>;

/// Canonical JSON encoding of `value`: object keys in sorted order at every
/// depth.
///
/// # Errors
///
/// Returns [`CacheError::Encode`] when the value cannot be encoded.
pub fn canonical_json(value: &Value) -> Result<String, CacheError> {
    serde_json::to_string(&Canonical(value)).map_err(|e| CacheError::Encode(e.to_string()))
}

struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Canonical<'_>> =
                    map.iter().map(|(k, v)| (k, Canonical(v))).collect();
                serializer.collect_map(sorted)
            },
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Default id for params: their canonical JSON, unless they name a `method`
/// other than `GET`.
///
/// # Errors
///
/// Returns [`CacheError::Encode`] when the params cannot be encoded.
pub fn default_cache_id_by_params(params: &Value) -> Result<Option<String>, CacheError> {
    let method = params.get("method").and_then(Value::as_str);
    if method.is_some_and(|m| !m.eq_ignore_ascii_case("get")) {
        return Ok(None);
    }
    canonical_json(params).map(Some)
}

/// Default id for trigger arguments: the canonical JSON of the argument list.
///
/// # Errors
///
/// Returns [`CacheError::Encode`] when the arguments cannot be encoded.
pub fn default_cache_id_by_args(args: &Value) -> Result<Option<String>, CacheError> {
    canonical_json(args).map(Some)
}

/// How the cache is consulted before the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum FetchPolicy {
    /// Serve hits from the cache, fall back to the network
    #[default]
    CacheFirst,
    /// Serve hits from the cache, abort on a miss
    CacheOnly,
    /// Always go to the network. Resolved responses are still written.
    NoCache,
}

impl FetchPolicy {
    /// Whether lookups happen under this policy
    #[must_use]
    pub const fn participates(self) -> bool {
        !matches!(self, Self::NoCache)
    }

    /// Kebab-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheFirst => "cache-first",
            Self::CacheOnly => "cache-only",
            Self::NoCache => "no-cache",
        }
    }
}

impl FromStr for FetchPolicy {
    type Err = ConfigError;

    /// Any name starting with `no-cache` selects [`FetchPolicy::NoCache`].
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "cache-first" => Ok(Self::CacheFirst),
            "cache-only" => Ok(Self::CacheOnly),
            n if n.starts_with("no-cache") => Ok(Self::NoCache),
            other => Err(ConfigError::UnknownFetchPolicy(other.to_owned())),
        }
    }
}

impl TryFrom<String> for FetchPolicy {
    type Error = ConfigError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of a state cache ids are derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKeySource {
    /// `state.params`
    Params,
    /// `state.args`, as a JSON array
    Args,
}

/// Caching strategy, resolved once when a manager is built
#[derive(Clone)]
pub struct CachePolicy {
    source: CacheKeySource,
    cache_id: CacheIdFn,
    fetch_policy: FetchPolicy,
    bucket: SharedCacheStore,
}

impl CachePolicy {
    /// Cache keyed by params, using [`default_cache_id_by_params`] and a
    /// private bucket
    #[must_use]
    pub fn by_params() -> Self {
        Self::new(CacheKeySource::Params, Arc::new(default_cache_id_by_params))
    }

    /// Cache keyed by arguments, using [`default_cache_id_by_args`] and a
    /// private bucket
    #[must_use]
    pub fn by_args() -> Self {
        Self::new(CacheKeySource::Args, Arc::new(default_cache_id_by_args))
    }

    /// Cache keyed by `source` with a custom id function
    #[must_use]
    pub fn new(source: CacheKeySource, cache_id: CacheIdFn) -> Self {
        Self {
            source,
            cache_id,
            fetch_policy: FetchPolicy::default(),
            bucket: Arc::new(MemoryBucket::new()),
        }
    }

    /// Every request of `source` shares the single id `key`
    #[must_use]
    pub fn constant(source: CacheKeySource, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(
            source,
            Arc::new(move |_: &Value| -> Result<Option<String>, CacheError> {
                Ok(Some(key.clone()))
            }),
        )
    }

    /// Replace the id function
    #[must_use]
    pub fn with_cache_id(mut self, cache_id: CacheIdFn) -> Self {
        self.cache_id = cache_id;
        self
    }

    /// Set the fetch policy
    #[must_use]
    pub const fn with_fetch_policy(mut self, fetch_policy: FetchPolicy) -> Self {
        self.fetch_policy = fetch_policy;
        self
    }

    /// Set the backing store
    #[must_use]
    pub fn with_bucket(mut self, bucket: SharedCacheStore) -> Self {
        self.bucket = bucket;
        self
    }

    /// Key source of this policy
    #[must_use]
    pub const fn source(&self) -> CacheKeySource {
        self.source
    }

    /// Fetch policy of this policy
    #[must_use]
    pub const fn fetch_policy(&self) -> FetchPolicy {
        self.fetch_policy
    }

    /// Backing store of this policy
    #[must_use]
    pub fn bucket(&self) -> &SharedCacheStore {
        &self.bucket
    }

    /// Cache id of `state`, `None` when it is not cacheable.
    ///
    /// # Errors
    ///
    /// Propagates failures of the id function.
    pub fn cache_id(&self, state: &RequestState) -> Result<Option<String>, CacheError> {
        match self.source {
            CacheKeySource::Params => {
                (self.cache_id)(state.params.as_ref().unwrap_or(&Value::Null))
            },
            CacheKeySource::Args => (self.cache_id)(&Value::Array(state.args.clone())),
        }
    }

    /// Decorate `inner` with this policy
    #[must_use]
    pub fn wrap(&self, inner: SharedListener) -> CachedListener {
        CachedListener {
            policy: self.clone(),
            inner,
        }
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("source", &self.source)
            .field("fetch_policy", &self.fetch_policy)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// Listener produced by [`CachePolicy::wrap`]
pub struct CachedListener {
    policy: CachePolicy,
    inner: SharedListener,
}

impl CachedListener {
    fn lookup(
        &self,
        state: &RequestState,
        helpers: &RequestHelpers,
    ) -> Result<Option<RequestState>, RequestError> {
        let Some(id) = self.policy.cache_id(state)? else {
            tracing::trace!("Request is not cacheable");
            return Ok(None);
        };

        let Some(cached) = self.policy.bucket.get(&id) else {
            tracing::trace!(cache_id = %id, "Cache miss");
            metrics::counter!(CACHE_MISSES).increment(1);
            return Ok(None);
        };

        tracing::trace!(cache_id = %id, "Cache hit");
        metrics::counter!(CACHE_HITS).increment(1);

        let mut spliced = state.clone();
        spliced.splice_cached(&cached);
        if helpers.short_circuit(spliced.clone()) {
            Ok(Some(spliced))
        } else {
            Ok(None)
        }
    }
}

impl StateListener for CachedListener {
    fn on_change(
        &self,
        state: &RequestState,
        helpers: &RequestHelpers,
    ) -> Result<(), RequestError> {
        match state.status {
            RequestStatus::Aborted if state.resolved.is_some() => {
                let mut resurfaced = state.clone();
                resurfaced.rejected = None;
                resurfaced.set_status(RequestStatus::Resolved);
                return self.inner.on_change(&resurfaced, helpers);
            },
            RequestStatus::Prepared if self.policy.fetch_policy.participates() => {
                if let Some(hit) = self.lookup(state, helpers)? {
                    return self.inner.on_change(&hit, helpers);
                }
                if self.policy.fetch_policy == FetchPolicy::CacheOnly {
                    tracing::debug!("Cache-only miss, aborting");
                    helpers.abort();
                }
            },
            RequestStatus::Resolved => {
                if let Some(id) = self.policy.cache_id(state)? {
                    self.policy.bucket.set(&id, state.clone());
                    metrics::counter!(CACHE_WRITES).increment(1);
                }
            },
            _ => {},
        }

        self.inner.on_change(state, helpers)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::state::{RequestId, Response};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Seen(Mutex<Vec<RequestState>>);

    impl StateListener for Seen {
        fn on_change(&self, state: &RequestState, _: &RequestHelpers) -> Result<(), RequestError> {
            self.0.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    fn prepared(params: Value) -> RequestState {
        let mut state = RequestState::init(RequestId::next(), vec![params.clone()]);
        state.params = Some(params);
        state.set_status(RequestStatus::Prepared);
        state
    }

    fn resolved(params: Value, value: Value) -> RequestState {
        let mut state = prepared(params);
        state.responded = Some(Response::json_body(200, &value));
        state.resolved = Some(value);
        state.set_status(RequestStatus::Resolved);
        state
    }

    fn wrapped(policy: &CachePolicy) -> (Arc<Seen>, CachedListener) {
        let seen = Arc::new(Seen::default());
        let listener = policy.wrap(seen.clone());
        (seen, listener)
    }

    #[test]
    fn test_params_id_is_canonical() {
        let a = default_cache_id_by_params(&json!({"url": "/x", "headers": {"b": 1, "a": 2}}));
        let b = default_cache_id_by_params(&json!({"headers": {"a": 2, "b": 1}, "url": "/x"}));
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn test_non_get_params_are_not_cacheable() {
        assert_eq!(
            default_cache_id_by_params(&json!({"url": "/x", "method": "POST"})).unwrap(),
            None
        );
        assert!(
            default_cache_id_by_params(&json!({"url": "/x", "method": "get"}))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_args_id_encodes_list() {
        assert_eq!(
            default_cache_id_by_args(&json!([1, "a"])).unwrap(),
            Some("[1,\"a\"]".to_string())
        );
    }

    #[test]
    fn test_fetch_policy_parsing() {
        assert_eq!("cache-first".parse::<FetchPolicy>().unwrap(), FetchPolicy::CacheFirst);
        assert_eq!("cache-only".parse::<FetchPolicy>().unwrap(), FetchPolicy::CacheOnly);
        assert_eq!(
            "no-cache-and-network".parse::<FetchPolicy>().unwrap(),
            FetchPolicy::NoCache
        );
        assert!(matches!(
            "network-only".parse::<FetchPolicy>(),
            Err(ConfigError::UnknownFetchPolicy(_))
        ));

        let decoded: FetchPolicy = serde_json::from_value(json!("no-cache")).unwrap();
        assert_eq!(decoded, FetchPolicy::NoCache);
    }

    #[test]
    fn test_resolved_is_written_and_looked_up() {
        let policy = CachePolicy::by_params();
        let (_seen, listener) = wrapped(&policy);
        let helpers = RequestHelpers::detached();

        let done = resolved(json!({"url": "/x"}), json!({"a": 1}));
        listener.on_change(&done, &helpers).unwrap();

        let id = policy.cache_id(&done).unwrap().unwrap();
        assert_eq!(policy.bucket().get(&id).unwrap().resolved, Some(json!({"a": 1})));
    }

    #[test]
    fn test_hit_short_circuits_attempt() {
        let policy = CachePolicy::by_params();
        let (seen, listener) = wrapped(&policy);
        listener
            .on_change(
                &resolved(json!({"url": "/x"}), json!({"a": 1})),
                &RequestHelpers::detached(),
            )
            .unwrap();

        let (helpers, _signals) = RequestHelpers::attempt();
        let next = prepared(json!({"url": "/x"}));
        listener.on_change(&next, &helpers).unwrap();

        let delivered = seen.0.lock().unwrap().last().cloned().unwrap();
        assert_eq!(delivered.status, RequestStatus::Resolved);
        assert_eq!(delivered.request_id, next.request_id);
        assert_eq!(delivered.resolved, Some(json!({"a": 1})));
        assert!(helpers.is_ended());
        assert_eq!(helpers.take_short_circuit(), Some(delivered));
    }

    #[test]
    fn test_no_cache_skips_lookup() {
        let policy = CachePolicy::by_params().with_fetch_policy(FetchPolicy::NoCache);
        let (seen, listener) = wrapped(&policy);
        listener
            .on_change(&resolved(json!({"url": "/x"}), json!(1)), &RequestHelpers::detached())
            .unwrap();

        let (helpers, _signals) = RequestHelpers::attempt();
        listener.on_change(&prepared(json!({"url": "/x"})), &helpers).unwrap();

        assert_eq!(
            seen.0.lock().unwrap().last().unwrap().status,
            RequestStatus::Prepared
        );
        assert!(!helpers.is_ended());
    }

    #[test]
    fn test_cache_only_miss_aborts() {
        let policy = CachePolicy::by_params().with_fetch_policy(FetchPolicy::CacheOnly);
        let (seen, listener) = wrapped(&policy);

        let (helpers, signals) = RequestHelpers::attempt();
        listener.on_change(&prepared(json!({"url": "/y"})), &helpers).unwrap();

        assert!(*signals.abort.borrow());
        assert_eq!(seen.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_aborted_with_resolved_resurfaces_as_resolved() {
        let policy = CachePolicy::by_args();
        let (seen, listener) = wrapped(&policy);

        let mut state = resolved(json!("a"), json!(7));
        state.set_status(RequestStatus::Aborted);
        state.rejected = Some(RequestError::Aborted);
        listener.on_change(&state, &RequestHelpers::detached()).unwrap();

        let delivered = seen.0.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].status, RequestStatus::Resolved);
        assert!(delivered[0].rejected.is_none());
    }

    #[test]
    fn test_cache_id_failure_propagates() {
        let failing: CacheIdFn =
            Arc::new(|_: &Value| -> Result<Option<String>, CacheError> {
                Err(CacheError::Encode("nope".into()))
            });
        let policy = CachePolicy::by_params().with_cache_id(failing);
        let (seen, listener) = wrapped(&policy);

        let (helpers, _signals) = RequestHelpers::attempt();
        let result = listener.on_change(&prepared(json!({"url": "/x"})), &helpers);

        assert!(matches!(result, Err(RequestError::Cache(_))));
        assert!(seen.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_constant_key_shares_entry() {
        let policy = CachePolicy::constant(CacheKeySource::Args, "all");
        assert_eq!(
            policy.cache_id(&prepared(json!(1))).unwrap(),
            policy.cache_id(&prepared(json!(2))).unwrap()
        );
    }

    #[test]
    fn test_global_bucket_is_shared() {
        let a = MemoryBucket::global();
        let b = MemoryBucket::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
