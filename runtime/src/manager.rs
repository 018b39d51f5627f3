//! Request manager: the stateful side of the lifecycle.
//!
//! A [`RequestManager`] belongs to one consumer (typically a UI component).
//! It starts attempts through a [`RequestInitiator`], follows each of them in
//! an ordered registry, releases the oldest entries when the concurrency
//! limit is reached, and publishes a [`RequestView`] of the registry on a
//! watch channel.
//!
//! ```ignore
//! let manager = RequestManager::builder(transport)
//!     .request(RequestMapper::value(json!({ "url": "/profile" })))
//!     .cache_by_params()
//!     .build()?;
//!
//! // Auto mode: the plain-value request description triggers on sync
//! manager.sync()?;
//!
//! let mut view = manager.subscribe();
//! view.changed().await?;
//! ```

use crate::config::{CacheBucket, RequestOptions};
use crate::error::ManagerError;
use crate::initiator::{AttemptHandle, InitiatorConfig, RequestInitiator};
use crate::metrics::{REGISTRY_EVICTIONS, REGISTRY_SIZE};
use crate::transport::{RequestMapper, ResponseMapper, SharedTransport};
use request_lifecycle_core::{
    CacheIdFn, CacheKeySource, CachePolicy, ConfigError, FetchPolicy, RequestError,
    RequestHelpers, RequestId, RequestState, RequestStatus, SharedClock, SharedListener,
    SharedRequestReducer, StateListener,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::watch;

/// Callback receiving every state the registry records
pub type OnChange = Arc<dyn Fn(&RequestState) + Send + Sync>;

/// One registered attempt, as seen by the consumer
#[derive(Debug, Clone)]
pub struct RequestEntry {
    state: RequestState,
    helpers: RequestHelpers,
    manager: Weak<ManagerInner>,
}

impl RequestEntry {
    /// Latest recorded state
    #[must_use]
    pub const fn state(&self) -> &RequestState {
        &self.state
    }

    /// Identity of the attempt, `None` for the idle placeholder
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        self.state.request_id
    }

    /// Latest recorded status
    #[must_use]
    pub const fn status(&self) -> RequestStatus {
        self.state.status
    }

    /// Whether the attempt is in flight
    #[must_use]
    pub const fn pending(&self) -> bool {
        self.state.pending
    }

    /// Abort the attempt. No-op once it ended.
    pub fn abort(&self) -> bool {
        self.helpers.abort()
    }

    /// Report progress on behalf of the attempt
    pub fn set_progress(&self, progress: Value) {
        self.helpers.set_progress(progress);
    }

    /// Remove the entry from its manager's registry.
    ///
    /// Returns `false` when the entry was not registered anymore.
    pub fn release(&self) -> bool {
        match (self.manager.upgrade(), self.state.request_id) {
            (Some(inner), Some(id)) => inner.release(id).is_ok(),
            _ => false,
        }
    }

    /// Start a new attempt with this entry's arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::TornDown`] when the manager is gone.
    pub fn repeat(&self) -> Result<AttemptHandle, ManagerError> {
        let inner = self.manager.upgrade().ok_or(ManagerError::TornDown)?;
        inner.trigger(self.state.args.clone())
    }
}

/// What the consumer renders
#[derive(Debug, Clone)]
pub enum RequestView {
    /// Most recent entry, or the idle placeholder. Used when only one
    /// attempt is allowed at a time.
    Single(RequestEntry),
    /// Every registered entry, oldest first
    Many(Vec<RequestEntry>),
}

impl RequestView {
    /// Most recent entry. `None` only for an empty collection.
    #[must_use]
    pub fn latest(&self) -> Option<&RequestEntry> {
        match self {
            Self::Single(entry) => Some(entry),
            Self::Many(entries) => entries.last(),
        }
    }

    /// Registered entries, oldest first. The idle placeholder is not an
    /// entry.
    #[must_use]
    pub fn entries(&self) -> Vec<&RequestEntry> {
        match self {
            Self::Single(entry) if entry.request_id().is_some() => vec![entry],
            Self::Single(_) => Vec::new(),
            Self::Many(entries) => entries.iter().collect(),
        }
    }

    /// Whether no attempt is registered
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Handle to a request manager.
///
/// Cloning is cheap; clones drive the same registry. The manager is torn
/// down when the last clone is dropped, or explicitly with
/// [`teardown`](Self::teardown).
#[derive(Clone)]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

impl RequestManager {
    /// Start configuring a manager around `transport`
    #[must_use]
    pub fn builder(transport: SharedTransport) -> RequestManagerBuilder {
        RequestManagerBuilder::new(transport)
    }

    /// Start a new attempt with `args`.
    ///
    /// Releases the oldest entries first when the registry is full. The
    /// attempt is spawned on the current tokio runtime; its `init` state is
    /// registered before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::TornDown`] after teardown.
    pub fn trigger(&self, args: Vec<Value>) -> Result<AttemptHandle, ManagerError> {
        self.inner.trigger(args)
    }

    /// Remove an entry from the registry, aborting it first when
    /// `abort_on_release` is set. Returns the entry's last state.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownRequest`] when no entry has this id.
    pub fn release(&self, request_id: RequestId) -> Result<RequestState, ManagerError> {
        self.inner.release(request_id)
    }

    /// Start a new attempt with the arguments of a registered entry.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownRequest`] when no entry has this id and
    /// [`ManagerError::TornDown`] after teardown.
    pub fn repeat(&self, request_id: RequestId) -> Result<AttemptHandle, ManagerError> {
        let args = self
            .inner
            .lock_registry()
            .get(request_id)
            .map(|slot| slot.state.args.clone())
            .ok_or(ManagerError::UnknownRequest(request_id))?;
        self.inner.trigger(args)
    }

    /// Release every entry, returning to the idle view
    pub fn reset(&self) {
        let slots = {
            let mut registry = self.inner.lock_registry();
            let slots = std::mem::take(&mut registry.slots);
            self.inner.publish(&registry);
            slots
        };
        for slot in &slots {
            self.inner.retire(slot);
        }
        tracing::debug!(released = slots.len(), "Registry reset");
    }

    /// Abort every registered attempt, keeping their entries
    pub fn abort_all(&self) {
        self.inner.abort_all();
    }

    /// Current view
    #[must_use]
    pub fn view(&self) -> RequestView {
        self.inner.view.borrow().clone()
    }

    /// Receiver that is notified on every registry change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RequestView> {
        self.inner.view.subscribe()
    }

    /// Number of registered entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock_registry().slots.len()
    }

    /// Whether no entry is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current options
    #[must_use]
    pub fn options(&self) -> RequestOptions {
        self.inner.option(Clone::clone)
    }

    /// Replace the options, then re-run the auto-trigger check.
    ///
    /// The cache bucket and fetch policy are fixed when the manager is built;
    /// changing them here has no effect on caching.
    ///
    /// # Errors
    ///
    /// See [`sync`](Self::sync).
    pub fn set_options(
        &self,
        options: RequestOptions,
    ) -> Result<Option<AttemptHandle>, ManagerError> {
        let auto = options.auto;
        self.inner.initiator.configure(|config| {
            config.throw_on_abortions = options.throw_on_abortions;
            config.throw_on_rejections = options.throw_on_rejections;
        });
        *self
            .inner
            .options
            .write()
            .unwrap_or_else(PoisonError::into_inner) = options;
        if !auto {
            self.inner.abort_all();
        }
        self.sync()
    }

    /// Replace the request description, then re-run the auto-trigger check
    ///
    /// # Errors
    ///
    /// See [`sync`](Self::sync).
    pub fn set_request(
        &self,
        request: RequestMapper,
    ) -> Result<Option<AttemptHandle>, ManagerError> {
        self.inner.initiator.configure(|config| config.request = request);
        self.sync()
    }

    /// Replace the response mapper. Running attempts use it from their next
    /// stage on.
    pub fn set_response(&self, response: ResponseMapper) {
        self.inner.initiator.configure(|config| config.response = response);
    }

    /// Turn auto-triggering on or off.
    ///
    /// Turning it off aborts every registered attempt. Turning it on
    /// triggers with the current request description.
    ///
    /// # Errors
    ///
    /// See [`sync`](Self::sync).
    pub fn set_auto(&self, auto: bool) -> Result<Option<AttemptHandle>, ManagerError> {
        self.inner
            .options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .auto = auto;
        *self
            .inner
            .last_auto
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        if auto {
            self.sync()
        } else {
            self.inner.abort_all();
            Ok(None)
        }
    }

    /// Auto-trigger check.
    ///
    /// With `auto` set and a plain-value request description, triggers when
    /// the value differs from the one last seen. A falsy value (`null`,
    /// `false`, `0`, `""`) triggers nothing and only releases entries over
    /// the concurrency limit, so in single mode the current entry stays.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::TornDown`] after teardown.
    #[tracing::instrument(skip(self), name = "manager_sync")]
    pub fn sync(&self) -> Result<Option<AttemptHandle>, ManagerError> {
        if self.inner.torn_down.load(Ordering::Acquire) {
            return Err(ManagerError::TornDown);
        }
        if !self.inner.option(|o| o.auto) {
            return Ok(None);
        }
        let Some(value) = self
            .inner
            .initiator
            .read(|config| config.request.plain_value().cloned())
        else {
            return Ok(None);
        };

        {
            let mut last = self
                .inner
                .last_auto
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.as_ref() == Some(&value) {
                return Ok(None);
            }
            *last = Some(value.clone());
        }

        if is_falsy(&value) {
            tracing::debug!("Request description is empty, cleaning up");
            self.inner.make_room(0);
            return Ok(None);
        }

        tracing::debug!("Request description changed, triggering");
        self.inner.trigger(vec![value]).map(Some)
    }

    /// Stop following attempts. With `abort_on_unmount`, every registered
    /// attempt is aborted first. Later triggers fail with
    /// [`ManagerError::TornDown`].
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// Whether [`teardown`](Self::teardown) ran
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("entries", &self.len())
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

#[derive(Debug, Clone)]
struct Slot {
    state: RequestState,
    helpers: RequestHelpers,
}

/// Registered attempts in insertion order
#[derive(Debug, Default)]
struct Registry {
    slots: Vec<Slot>,
}

impl Registry {
    fn position(&self, request_id: RequestId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state.request_id == Some(request_id))
    }

    fn get(&self, request_id: RequestId) -> Option<&Slot> {
        self.position(request_id).map(|i| &self.slots[i])
    }

    fn remove(&mut self, request_id: RequestId) -> Option<Slot> {
        self.position(request_id).map(|i| self.slots.remove(i))
    }

    /// Record `state`. New ids are only accepted on `init`.
    fn record(&mut self, state: &RequestState, helpers: &RequestHelpers) -> bool {
        let Some(id) = state.request_id else {
            return false;
        };
        if let Some(i) = self.position(id) {
            self.slots[i].state = state.clone();
            true
        } else if state.status == RequestStatus::Init {
            self.slots.push(Slot {
                state: state.clone(),
                helpers: helpers.clone(),
            });
            true
        } else {
            false
        }
    }
}

struct ManagerInner {
    weak: Weak<ManagerInner>,
    options: RwLock<RequestOptions>,
    initiator: RequestInitiator,
    listener: SharedListener,
    registry: Mutex<Registry>,
    view: watch::Sender<RequestView>,
    last_auto: Mutex<Option<Value>>,
    on_change: Option<OnChange>,
    torn_down: AtomicBool,
}

impl ManagerInner {
    fn option<T>(&self, read: impl FnOnce(&RequestOptions) -> T) -> T {
        read(&self.options.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[tracing::instrument(skip(self, args), name = "manager_trigger")]
    fn trigger(&self, args: Vec<Value>) -> Result<AttemptHandle, ManagerError> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(ManagerError::TornDown);
        }
        self.make_room(1);

        let attempt = self.initiator.initiate(args, Arc::clone(&self.listener));
        tracing::debug!(request_id = %attempt.request_id(), "Triggered request");
        Ok(attempt.spawn())
    }

    #[tracing::instrument(skip(self), name = "manager_release")]
    fn release(&self, request_id: RequestId) -> Result<RequestState, ManagerError> {
        let slot = {
            let mut registry = self.lock_registry();
            let slot = registry
                .remove(request_id)
                .ok_or(ManagerError::UnknownRequest(request_id))?;
            self.publish(&registry);
            slot
        };
        self.retire(&slot);
        Ok(slot.state)
    }

    /// Release the oldest entries until `incoming` more fit under the limit
    fn make_room(&self, incoming: usize) {
        let Some(limit) = self.option(|o| o.concurrent_requests.limit()) else {
            return;
        };

        let evicted: Vec<Slot> = {
            let mut registry = self.lock_registry();
            let excess = (registry.slots.len() + incoming).saturating_sub(limit);
            if excess == 0 {
                return;
            }
            let evicted = registry.slots.drain(..excess).collect();
            self.publish(&registry);
            evicted
        };

        for slot in &evicted {
            tracing::debug!(request_id = ?slot.state.request_id, "Evicting oldest request");
            self.retire(slot);
        }
        metrics::counter!(REGISTRY_EVICTIONS).increment(evicted.len() as u64);
    }

    /// Detach a removed entry from its attempt
    fn retire(&self, slot: &Slot) {
        slot.helpers.unsubscribe();
        if self.option(|o| o.abort_on_release) {
            slot.helpers.abort();
        }
    }

    fn abort_all(&self) {
        let helpers: Vec<RequestHelpers> = self
            .lock_registry()
            .slots
            .iter()
            .map(|slot| slot.helpers.clone())
            .collect();
        for helper in helpers {
            helper.abort();
        }
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let abort = self.option(|o| o.abort_on_unmount);
        let slots = self.lock_registry().slots.clone();
        for slot in &slots {
            slot.helpers.unsubscribe();
            if abort {
                slot.helpers.abort();
            }
        }
        tracing::debug!(entries = slots.len(), aborted = abort, "Request manager torn down");
    }

    /// Follow one state of an attempt
    fn record(&self, state: &RequestState, helpers: &RequestHelpers) {
        if helpers.is_unsubscribed() || self.torn_down.load(Ordering::Acquire) {
            return;
        }
        let release_on_abort = self.option(|o| o.release_on_abort);

        {
            let mut registry = self.lock_registry();
            if !registry.record(state, helpers) {
                return;
            }
            if release_on_abort && state.status == RequestStatus::Aborted {
                if let Some(id) = state.request_id {
                    registry.remove(id);
                    helpers.unsubscribe();
                }
            }
            self.publish(&registry);
        }

        if let Some(on_change) = &self.on_change {
            on_change(state);
        }
    }

    fn publish(&self, registry: &Registry) {
        metrics::gauge!(REGISTRY_SIZE).set(registry.slots.len() as f64);
        self.view.send_replace(self.view_of(registry));
    }

    fn view_of(&self, registry: &Registry) -> RequestView {
        if self.option(|o| o.concurrent_requests.is_single()) {
            RequestView::Single(
                registry
                    .slots
                    .last()
                    .map_or_else(|| idle_entry(&self.weak), |slot| self.entry(slot)),
            )
        } else {
            RequestView::Many(registry.slots.iter().map(|slot| self.entry(slot)).collect())
        }
    }

    fn entry(&self, slot: &Slot) -> RequestEntry {
        RequestEntry {
            state: slot.state.clone(),
            helpers: slot.helpers.clone(),
            manager: self.weak.clone(),
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn idle_entry(manager: &Weak<ManagerInner>) -> RequestEntry {
    RequestEntry {
        state: RequestState::idle(),
        helpers: RequestHelpers::detached(),
        manager: manager.clone(),
    }
}

/// Innermost listener of a manager: records states in the registry
struct ManagerListener {
    manager: Weak<ManagerInner>,
}

impl StateListener for ManagerListener {
    fn on_change(
        &self,
        state: &RequestState,
        helpers: &RequestHelpers,
    ) -> Result<(), RequestError> {
        if let Some(inner) = self.manager.upgrade() {
            inner.record(state, helpers);
        }
        Ok(())
    }
}

/// Cache id selection given to [`RequestManagerBuilder::cache_by`]
#[derive(Clone)]
enum CacheBy {
    Key(String),
    Function(CacheIdFn),
}

/// Builder for [`RequestManager`]
pub struct RequestManagerBuilder {
    transport: SharedTransport,
    request: Option<RequestMapper>,
    response: Option<ResponseMapper>,
    options: RequestOptions,
    reducer: Option<SharedRequestReducer>,
    clock: Option<SharedClock>,
    cache_by: Option<CacheBy>,
    cache_by_params: Option<Option<CacheIdFn>>,
    cache_by_args: Option<Option<CacheIdFn>>,
    on_change: Option<OnChange>,
}

impl RequestManagerBuilder {
    /// Builder with default options around `transport`
    #[must_use]
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            request: None,
            response: None,
            options: RequestOptions::default(),
            reducer: None,
            clock: None,
            cache_by: None,
            cache_by_params: None,
            cache_by_args: None,
            on_change: None,
        }
    }

    /// Request description: a plain value or a function of the arguments
    #[must_use]
    pub fn request(mut self, request: RequestMapper) -> Self {
        self.request = Some(request);
        self
    }

    /// Response mapper
    #[must_use]
    pub fn response(mut self, response: ResponseMapper) -> Self {
        self.response = Some(response);
        self
    }

    /// Plain-data options
    #[must_use]
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Cache store
    #[must_use]
    pub fn cache_bucket(mut self, bucket: CacheBucket) -> Self {
        self.options.cache_bucket = bucket;
        self
    }

    /// Cache lookup strategy
    #[must_use]
    pub const fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.options.fetch_policy = policy;
        self
    }

    /// Cache every request under the single id `key`.
    ///
    /// Keyed by arguments when the request description is a function, by
    /// params otherwise.
    #[must_use]
    pub fn cache_by_key(mut self, key: impl Into<String>) -> Self {
        self.cache_by = Some(CacheBy::Key(key.into()));
        self
    }

    /// Cache with a custom id function.
    ///
    /// The function receives the arguments (as a JSON array) when the request
    /// description is a function, the params otherwise.
    #[must_use]
    pub fn cache_by(mut self, cache_id: CacheIdFn) -> Self {
        self.cache_by = Some(CacheBy::Function(cache_id));
        self
    }

    /// Cache by params with the default id function
    #[must_use]
    pub fn cache_by_params(mut self) -> Self {
        self.cache_by_params = Some(None);
        self
    }

    /// Cache by params with a custom id function
    #[must_use]
    pub fn cache_by_params_with(mut self, cache_id: CacheIdFn) -> Self {
        self.cache_by_params = Some(Some(cache_id));
        self
    }

    /// Cache by arguments with the default id function
    #[must_use]
    pub fn cache_by_args(mut self) -> Self {
        self.cache_by_args = Some(None);
        self
    }

    /// Cache by arguments with a custom id function
    #[must_use]
    pub fn cache_by_args_with(mut self, cache_id: CacheIdFn) -> Self {
        self.cache_by_args = Some(Some(cache_id));
        self
    }

    /// Replace the state reducer
    #[must_use]
    pub fn state_reducer(mut self, reducer: SharedRequestReducer) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// Replace the clock
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Callback receiving every state the registry records
    #[must_use]
    pub fn on_change(mut self, on_change: impl Fn(&RequestState) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(on_change));
        self
    }

    /// Same as [`on_change`](Self::on_change)
    #[must_use]
    pub fn on_state_change(
        self,
        on_change: impl Fn(&RequestState) + Send + Sync + 'static,
    ) -> Self {
        self.on_change(on_change)
    }

    /// Build the manager.
    ///
    /// Does not trigger anything; call [`RequestManager::sync`] to run the
    /// first auto-trigger check.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingCacheModes`] when more than one of
    /// `cache_by`, `cache_by_params` and `cache_by_args` was configured.
    pub fn build(self) -> Result<RequestManager, ConfigError> {
        let modes: Vec<&'static str> = [
            ("cache_by", self.cache_by.is_some()),
            ("cache_by_params", self.cache_by_params.is_some()),
            ("cache_by_args", self.cache_by_args.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();
        if modes.len() > 1 {
            return Err(ConfigError::ConflictingCacheModes(modes));
        }

        let request = self.request.clone().unwrap_or_default();
        let cache = self.cache_policy(&request);

        let mut config = InitiatorConfig::new(Arc::clone(&self.transport))
            .with_request(request)
            .with_throw_on_abortions(self.options.throw_on_abortions)
            .with_throw_on_rejections(self.options.throw_on_rejections);
        if let Some(response) = self.response {
            config = config.with_response(response);
        }
        if let Some(reducer) = self.reducer {
            config = config.with_reducer(reducer);
        }
        if let Some(clock) = self.clock {
            config = config.with_clock(clock);
        }
        let initiator = RequestInitiator::new(config);

        let options = self.options;
        let on_change = self.on_change;
        let inner = Arc::new_cyclic(|weak: &Weak<ManagerInner>| {
            let base: SharedListener = Arc::new(ManagerListener {
                manager: weak.clone(),
            });
            let listener: SharedListener = match &cache {
                Some(policy) => Arc::new(policy.wrap(base)),
                None => base,
            };
            let initial = if options.concurrent_requests.is_single() {
                RequestView::Single(idle_entry(weak))
            } else {
                RequestView::Many(Vec::new())
            };

            ManagerInner {
                weak: weak.clone(),
                options: RwLock::new(options),
                initiator,
                listener,
                registry: Mutex::new(Registry::default()),
                view: watch::Sender::new(initial),
                last_auto: Mutex::new(None),
                on_change,
                torn_down: AtomicBool::new(false),
            }
        });

        Ok(RequestManager { inner })
    }

    fn cache_policy(&self, request: &RequestMapper) -> Option<CachePolicy> {
        let policy = if let Some(cache_by) = &self.cache_by {
            let source = if request.is_function() {
                CacheKeySource::Args
            } else {
                CacheKeySource::Params
            };
            match cache_by {
                CacheBy::Key(key) => CachePolicy::constant(source, key.clone()),
                CacheBy::Function(cache_id) => CachePolicy::new(source, Arc::clone(cache_id)),
            }
        } else if let Some(cache_id) = &self.cache_by_params {
            with_id(CachePolicy::by_params(), cache_id.as_ref())
        } else if let Some(cache_id) = &self.cache_by_args {
            with_id(CachePolicy::by_args(), cache_id.as_ref())
        } else {
            return None;
        };

        Some(
            policy
                .with_fetch_policy(self.options.fetch_policy)
                .with_bucket(self.options.cache_bucket.resolve()),
        )
    }
}

fn with_id(policy: CachePolicy, cache_id: Option<&CacheIdFn>) -> CachePolicy {
    match cache_id {
        Some(cache_id) => policy.with_cache_id(Arc::clone(cache_id)),
        None => policy,
    }
}

impl std::fmt::Debug for RequestManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManagerBuilder")
            .field("request", &self.request)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_falsy_values() {
        assert!(is_falsy(&Value::Null));
        assert!(is_falsy(&json!(false)));
        assert!(is_falsy(&json!(0)));
        assert!(is_falsy(&json!("")));
        assert!(!is_falsy(&json!({})));
        assert!(!is_falsy(&json!([])));
        assert!(!is_falsy(&json!("/x")));
    }

    #[test]
    fn test_registry_accepts_new_ids_only_on_init() {
        let mut registry = Registry::default();
        let helpers = RequestHelpers::detached();

        let mut late = RequestState::init(RequestId::next(), vec![]);
        late.set_status(RequestStatus::Prepared);
        assert!(!registry.record(&late, &helpers));

        let fresh = RequestState::init(RequestId::next(), vec![]);
        assert!(registry.record(&fresh, &helpers));

        let mut next = fresh.clone();
        next.set_status(RequestStatus::Prepared);
        assert!(registry.record(&next, &helpers));
        assert_eq!(registry.slots.len(), 1);
        assert_eq!(registry.slots[0].state.status, RequestStatus::Prepared);
    }
}
