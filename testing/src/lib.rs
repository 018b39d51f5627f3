//! # Request Lifecycle Testing
//!
//! Testing utilities for the request lifecycle engine.
//!
//! This crate provides:
//! - A deterministic clock
//! - A scriptable mock transport that counts calls and aborts
//! - A listener that records every state it receives
//! - A Given-When-Then harness for reducers
//! - proptest strategies for lifecycle actions
//!
//! ## Example
//!
//! ```ignore
//! use request_lifecycle_testing::{MockTransport, RecordingListener};
//!
//! #[tokio::test]
//! async fn test_happy_path() {
//!     let transport = MockTransport::new().respond_json(200, json!({"a": 1}));
//!     let initiator = RequestInitiator::new(InitiatorConfig::new(transport.shared()));
//!     let recorder = RecordingListener::shared();
//!
//!     let state = initiator.initiate(vec![json!({"url": "/x"})], recorder.clone()).run().await?;
//!     assert_eq!(state.resolved, Some(json!({"a": 1})));
//!     assert_eq!(transport.calls(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use request_lifecycle_core::environment::Clock;


pub use reducer_test::ReducerTest;

/// Mock implementations of the engine's collaborators.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use request_lifecycle_core::{
        RequestError, RequestHelpers, RequestState, RequestStatus, Response, StateListener,
    };
    use request_lifecycle_runtime::{PerformContext, SharedTransport, Transport};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making `requested.sent_at` reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use request_lifecycle_testing::mocks::FixedClock;
    /// use request_lifecycle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// What a [`MockTransport`] answers to one call
    #[derive(Debug, Clone)]
    pub enum MockReply {
        /// Respond with a JSON body and this status code
        Json(u16, Value),
        /// Fail with this error
        Error(RequestError),
        /// Never answer; only an abort ends the attempt
        Pending,
    }

    #[derive(Debug)]
    struct MockState {
        script: VecDeque<MockReply>,
        fallback: MockReply,
        progress: Vec<Value>,
        delay: Option<Duration>,
        params: Vec<Option<Value>>,
    }

    /// Scriptable transport.
    ///
    /// Replies queued with [`then`](Self::then) are used first, in order;
    /// afterwards every call gets the fallback reply. Clones share the script
    /// and the counters.
    #[derive(Debug, Clone)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
        calls: Arc<AtomicUsize>,
        aborts: Arc<AtomicUsize>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        /// Transport answering `200 {}` to every call
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState {
                    script: VecDeque::new(),
                    fallback: MockReply::Json(200, Value::Object(serde_json::Map::new())),
                    progress: Vec::new(),
                    delay: None,
                    params: Vec::new(),
                })),
                calls: Arc::new(AtomicUsize::new(0)),
                aborts: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_state(&self, update: impl FnOnce(&mut MockState)) {
            update(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
        }

        /// Answer every unscripted call with `status` and `body`
        #[must_use]
        pub fn respond_json(self, status: u16, body: Value) -> Self {
            self.with_state(|s| s.fallback = MockReply::Json(status, body));
            self
        }

        /// Fail every unscripted call with `error`
        #[must_use]
        pub fn fail_with(self, error: RequestError) -> Self {
            self.with_state(|s| s.fallback = MockReply::Error(error));
            self
        }

        /// Never answer unscripted calls
        #[must_use]
        pub fn pending(self) -> Self {
            self.with_state(|s| s.fallback = MockReply::Pending);
            self
        }

        /// Queue one reply for the next unanswered call
        #[must_use]
        pub fn then(self, reply: MockReply) -> Self {
            self.with_state(|s| s.script.push_back(reply));
            self
        }

        /// Report these progress values before answering
        #[must_use]
        pub fn with_progress(self, progress: Vec<Value>) -> Self {
            self.with_state(|s| s.progress = progress);
            self
        }

        /// Wait this long before answering
        #[must_use]
        pub fn with_delay(self, delay: Duration) -> Self {
            self.with_state(|s| s.delay = Some(delay));
            self
        }

        /// Shared handle for engine configuration
        #[must_use]
        pub fn shared(&self) -> SharedTransport {
            Arc::new(self.clone())
        }

        /// Number of `perform` calls
        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Number of aborters that ran
        #[must_use]
        pub fn aborts(&self) -> usize {
            self.aborts.load(Ordering::SeqCst)
        }

        /// Params of every call, in call order
        #[must_use]
        pub fn params(&self) -> Vec<Option<Value>> {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .params
                .clone()
        }
    }

    impl Transport for MockTransport {
        fn perform(
            &self,
            state: &RequestState,
            ctx: &PerformContext,
        ) -> BoxFuture<'static, Result<Response, RequestError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (reply, progress, delay) = {
                let mut mock = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                mock.params.push(state.params.clone());
                let reply = mock
                    .script
                    .pop_front()
                    .unwrap_or_else(|| mock.fallback.clone());
                (reply, mock.progress.clone(), mock.delay)
            };

            let aborts = Arc::clone(&self.aborts);
            ctx.register_aborter(move || {
                aborts.fetch_add(1, Ordering::SeqCst);
            });

            let reporter = ctx.progress_reporter();
            async move {
                for value in progress {
                    reporter.report(value);
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match reply {
                    MockReply::Json(status, body) => Ok(Response::json_body(status, &body)),
                    MockReply::Error(error) => Err(error),
                    MockReply::Pending => futures::future::pending().await,
                }
            }
            .boxed()
        }
    }

    /// Listener recording every state it receives
    #[derive(Debug, Default)]
    pub struct RecordingListener {
        states: Mutex<Vec<RequestState>>,
        fail_on: Option<RequestStatus>,
    }

    impl RecordingListener {
        /// Empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Empty recorder behind an `Arc`, ready to pass as a listener
        #[must_use]
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::new())
        }

        /// Recorder that fails when it receives `status`
        #[must_use]
        pub fn failing_on(status: RequestStatus) -> Self {
            Self {
                states: Mutex::new(Vec::new()),
                fail_on: Some(status),
            }
        }

        /// Every recorded state, in delivery order
        #[must_use]
        pub fn states(&self) -> Vec<RequestState> {
            self.states
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Status of every recorded state
        #[must_use]
        pub fn statuses(&self) -> Vec<RequestStatus> {
            self.states().iter().map(|s| s.status).collect()
        }

        /// Last recorded state
        #[must_use]
        pub fn last(&self) -> Option<RequestState> {
            self.states().pop()
        }
    }

    impl StateListener for RecordingListener {
        fn on_change(
            &self,
            state: &RequestState,
            _helpers: &RequestHelpers,
        ) -> Result<(), RequestError> {
            self.states
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(state.clone());
            if self.fail_on == Some(state.status) {
                return Err(RequestError::Listener(format!("refused {}", state.status)));
            }
            Ok(())
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use request_lifecycle_runtime::RequestView;
    use std::time::Duration;
    use tokio::sync::watch;
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber honoring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs it.
    pub fn init_test_tracing() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    }

    /// Wait until the view satisfies `done`, for at most `timeout`.
    ///
    /// Returns the matching view, or `None` on timeout or when the manager
    /// is gone.
    pub async fn wait_for_view(
        receiver: &mut watch::Receiver<RequestView>,
        timeout: Duration,
        done: impl FnMut(&RequestView) -> bool,
    ) -> Option<RequestView> {
        tokio::time::timeout(timeout, receiver.wait_for(done))
            .await
            .ok()?
            .ok()
            .map(|view| view.clone())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use request_lifecycle_core::{
        RequestAction, RequestError, RequestId, RequestStatus, Requested, Response, StatePatch,
    };
    use serde_json::{Value, json};

    /// Any lifecycle status
    pub fn arb_status() -> impl Strategy<Value = RequestStatus> {
        prop_oneof![
            Just(RequestStatus::Init),
            Just(RequestStatus::Prepared),
            Just(RequestStatus::Requested),
            Just(RequestStatus::Resolved),
            Just(RequestStatus::Aborted),
            Just(RequestStatus::Rejected),
        ]
    }

    /// Small JSON values
    pub fn arb_json() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    /// Any action except `Init`
    pub fn arb_stage_action() -> impl Strategy<Value = RequestAction> {
        prop_oneof![
            arb_json().prop_map(RequestAction::Progress),
            arb_json().prop_map(RequestAction::ParamsDefined),
            Just(RequestAction::RequestSent(Requested {
                sent_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            })),
            (200u16..600).prop_map(|status| {
                RequestAction::ResponseReceived(Response::new(status, b"{}".to_vec()))
            }),
            arb_json().prop_map(RequestAction::RequestSucceeded),
            Just(RequestAction::RequestAborted(RequestError::Aborted)),
            "[a-z]{1,8}".prop_map(|m| RequestAction::RequestFailed(RequestError::Transport(m))),
            arb_json().prop_map(|v| RequestAction::Custom(StatePatch::meta("tag", v))),
        ]
    }

    /// An `Init` followed by up to `max` stage actions
    pub fn arb_lifecycle(max: usize) -> impl Strategy<Value = Vec<RequestAction>> {
        prop::collection::vec(arb_stage_action(), 0..max).prop_map(|mut actions| {
            actions.insert(
                0,
                RequestAction::Init {
                    request_id: RequestId::next(),
                    args: Vec::new(),
                },
            );
            actions
        })
    }
}

// Re-export commonly used items
pub use helpers::{init_test_tracing, wait_for_view};
pub use mocks::{FixedClock, MockReply, MockTransport, RecordingListener, test_clock};

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use request_lifecycle_core::{
        RequestHelpers, RequestId, RequestState, RequestStatus, StateListener,
    };
    use request_lifecycle_runtime::{PerformContext, Transport};
    use serde_json::json;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_mock_transport_follows_script() {
        let transport = MockTransport::new()
            .respond_json(200, json!("fallback"))
            .then(MockReply::Json(201, json!("first")));
        let ctx = PerformContext::new(RequestHelpers::detached());
        let mut state = RequestState::init(RequestId::next(), vec![]);
        state.params = Some(json!({"url": "/x"}));

        let first = tokio_test::block_on(transport.perform(&state, &ctx)).unwrap();
        let second = tokio_test::block_on(transport.perform(&state, &ctx)).unwrap();

        assert_eq!(first.status, 201);
        assert_eq!(first.json().unwrap(), json!("first"));
        assert_eq!(second.json().unwrap(), json!("fallback"));
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.params(), vec![Some(json!({"url": "/x"})); 2]);
    }

    #[test]
    fn test_mock_transport_counts_aborts() {
        let transport = MockTransport::new().pending();
        let (helpers, _signals) = RequestHelpers::attempt();
        let ctx = PerformContext::new(helpers.clone());
        drop(transport.perform(&RequestState::idle(), &ctx));

        assert!(helpers.abort());
        assert_eq!(transport.aborts(), 1);
    }

    #[test]
    fn test_recording_listener_can_refuse() {
        let recorder = RecordingListener::failing_on(RequestStatus::Prepared);
        let helpers = RequestHelpers::detached();
        let mut state = RequestState::init(RequestId::next(), vec![]);

        assert!(recorder.on_change(&state, &helpers).is_ok());
        state.set_status(RequestStatus::Prepared);
        assert!(recorder.on_change(&state, &helpers).is_err());
        assert_eq!(recorder.statuses(), vec![RequestStatus::Init, RequestStatus::Prepared]);
    }
}
