//! The attempt engine.
//!
//! A [`RequestInitiator`] runs attempts through the lifecycle:
//!
//! 1. `init`: dispatched synchronously by [`RequestInitiator::initiate`]
//! 2. request mapping, then `prepared`
//! 3. transport invocation, then `requested`
//! 4. transport response, then response mapping, then `resolved`
//!
//! Every stage emits one action to the reducer and hands the new state to the
//! listener. Each await point races against the attempt's abort signal; the
//! race is biased towards the abort and every settled operation is held back
//! for one scheduling step, so an abort issued while an operation settles
//! still wins.

use crate::error::AttemptError;
use crate::metrics::{
    ATTEMPT_DURATION, ATTEMPTS_FINISHED, ATTEMPTS_SHORT_CIRCUITED, ATTEMPTS_STARTED,
};
use crate::transport::{
    PerformContext, ProgressReporter, RequestMapper, ResponseMapper, SharedTransport,
};
use futures::future::BoxFuture;
use request_lifecycle_core::{
    AttemptSignals, Clock, NoopListener, RequestAction, RequestError, RequestHelpers, RequestId,
    RequestState, RequestStateReducer, RequestStatus, Requested, SharedClock, SharedListener,
    SharedRequestReducer, SystemClock,
};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Collaborators and flags of an initiator
#[derive(Clone)]
pub struct InitiatorConfig {
    /// Turns trigger arguments into params
    pub request: RequestMapper,
    /// Turns the raw response into the resolved value
    pub response: ResponseMapper,
    /// Performs the request
    pub transport: SharedTransport,
    /// Applies lifecycle actions to the state
    pub reducer: SharedRequestReducer,
    /// Stamps `requested.sent_at`
    pub clock: SharedClock,
    /// Complete aborted attempts with [`AttemptError::Aborted`]
    pub throw_on_abortions: bool,
    /// Complete rejected attempts with [`AttemptError::Rejected`]
    pub throw_on_rejections: bool,
}

impl InitiatorConfig {
    /// Default configuration around `transport`
    #[must_use]
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            request: RequestMapper::default(),
            response: ResponseMapper::default(),
            transport,
            reducer: RequestStateReducer::shared(),
            clock: SystemClock::shared(),
            throw_on_abortions: false,
            throw_on_rejections: false,
        }
    }

    /// Set the request mapper
    #[must_use]
    pub fn with_request(mut self, request: RequestMapper) -> Self {
        self.request = request;
        self
    }

    /// Set the response mapper
    #[must_use]
    pub fn with_response(mut self, response: ResponseMapper) -> Self {
        self.response = response;
        self
    }

    /// Set the state reducer
    #[must_use]
    pub fn with_reducer(mut self, reducer: SharedRequestReducer) -> Self {
        self.reducer = reducer;
        self
    }

    /// Set the clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
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

impl std::fmt::Debug for InitiatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorConfig")
            .field("request", &self.request)
            .field("throw_on_abortions", &self.throw_on_abortions)
            .field("throw_on_rejections", &self.throw_on_rejections)
            .finish_non_exhaustive()
    }
}

/// Starts request attempts.
///
/// Cloning is cheap and clones share configuration. Configuration is read at
/// every stage, so [`configure`](Self::configure) also affects attempts that
/// are already running, from their next stage on.
#[derive(Clone, Debug)]
pub struct RequestInitiator {
    config: Arc<RwLock<InitiatorConfig>>,
}

impl RequestInitiator {
    /// Create an initiator
    #[must_use]
    pub fn new(config: InitiatorConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Update the configuration in place
    pub fn configure(&self, update: impl FnOnce(&mut InitiatorConfig)) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut config);
    }

    /// Read from the current configuration
    pub fn read<T>(&self, read: impl FnOnce(&InitiatorConfig) -> T) -> T {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        read(&config)
    }

    /// Create an attempt for `args`, reporting every state to `listener`.
    ///
    /// The `init` state is delivered before this returns. The remaining
    /// stages run when the returned [`Attempt`] is awaited or spawned.
    #[must_use]
    pub fn initiate(&self, args: Vec<Value>, listener: SharedListener) -> Attempt {
        let request_id = RequestId::next();
        let (helpers, signals) = RequestHelpers::attempt();

        metrics::counter!(ATTEMPTS_STARTED).increment(1);
        tracing::debug!(%request_id, "Initiating request");

        let mut driver = AttemptDriver {
            initiator: self.clone(),
            request_id,
            state: RequestState::idle(),
            listener,
            helpers: helpers.clone(),
            signals,
            started: Instant::now(),
        };
        let init = driver.dispatch(RequestAction::Init { request_id, args }).err();

        Attempt {
            request_id,
            helpers,
            driver,
            init,
        }
    }

    /// Run one attempt to completion without a listener.
    ///
    /// # Errors
    ///
    /// See [`Attempt::run`].
    pub async fn request(&self, args: Vec<Value>) -> Result<RequestState, AttemptError> {
        self.initiate(args, Arc::new(NoopListener)).run().await
    }
}

/// Why the stages stopped early
#[derive(Debug)]
enum Halt {
    Aborted,
    Failed(RequestError),
    ShortCircuited,
}

/// An attempt whose `init` state was already delivered
#[must_use = "an attempt does nothing past init unless run or spawned"]
pub struct Attempt {
    request_id: RequestId,
    helpers: RequestHelpers,
    driver: AttemptDriver,
    init: Option<Halt>,
}

impl Attempt {
    /// Identity of this attempt
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Control handle of this attempt
    pub const fn helpers(&self) -> &RequestHelpers {
        &self.helpers
    }

    /// Drive the attempt to its terminal state.
    ///
    /// # Errors
    ///
    /// - [`AttemptError::Aborted`] when aborted and `throw_on_abortions` is set
    /// - [`AttemptError::Rejected`] when rejected and `throw_on_rejections` is set
    /// - [`AttemptError::Listener`] when the listener fails on a rejected state
    ///
    /// A listener failing on a resolved or aborted state turns the attempt
    /// into a rejection carrying the listener's error.
    pub async fn run(self) -> Result<RequestState, AttemptError> {
        let Self { driver, init, .. } = self;
        driver.drive(init).await
    }

    /// Run the attempt on the tokio runtime.
    pub fn spawn(self) -> AttemptHandle {
        let request_id = self.request_id;
        let helpers = self.helpers.clone();
        let task = tokio::spawn(self.run());
        AttemptHandle {
            request_id,
            helpers,
            task,
        }
    }
}

impl std::fmt::Debug for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attempt")
            .field("request_id", &self.request_id)
            .field("status", &self.driver.state.status)
            .finish_non_exhaustive()
    }
}

/// Handle to a spawned attempt
#[derive(Debug)]
pub struct AttemptHandle {
    request_id: RequestId,
    helpers: RequestHelpers,
    task: JoinHandle<Result<RequestState, AttemptError>>,
}

impl AttemptHandle {
    /// Identity of the attempt
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Control handle of the attempt
    #[must_use]
    pub const fn helpers(&self) -> &RequestHelpers {
        &self.helpers
    }

    /// Abort the attempt. See [`RequestHelpers::abort`].
    pub fn abort(&self) -> bool {
        self.helpers.abort()
    }

    /// Wait for the attempt's completion value.
    ///
    /// # Errors
    ///
    /// Everything [`Attempt::run`] returns, plus [`AttemptError::Join`] when
    /// the task panicked or was cancelled.
    pub async fn outcome(self) -> Result<RequestState, AttemptError> {
        self.task
            .await
            .map_err(|e| AttemptError::Join(e.to_string()))?
    }
}

struct AttemptDriver {
    initiator: RequestInitiator,
    request_id: RequestId,
    state: RequestState,
    listener: SharedListener,
    helpers: RequestHelpers,
    signals: AttemptSignals,
    started: Instant,
}

impl AttemptDriver {
    #[tracing::instrument(
        skip(self, init),
        fields(request_id = %self.request_id),
        name = "request_attempt"
    )]
    async fn drive(mut self, init: Option<Halt>) -> Result<RequestState, AttemptError> {
        let outcome = match init {
            Some(halt) => Err(halt),
            None => self.stages().await,
        };
        self.settle(outcome)
    }

    async fn stages(&mut self) -> Result<Value, Halt> {
        let request = self.initiator.read(|c| c.request.clone());
        let params = self.race(request.map(&self.state.args)).await?;
        tracing::debug!("Params defined");
        self.dispatch(RequestAction::ParamsDefined(params))?;

        let (transport, clock) = self
            .initiator
            .read(|c| (Arc::clone(&c.transport), Arc::clone(&c.clock)));
        let ctx = PerformContext::new(self.helpers.clone());
        let operation = transport.perform(&self.state, &ctx);
        tracing::debug!("Request sent");
        self.dispatch(RequestAction::RequestSent(Requested {
            sent_at: clock.now(),
        }))?;

        let responded = self.race(operation).await?;
        tracing::debug!(status = responded.status, ok = responded.ok, "Response received");
        self.dispatch(RequestAction::ResponseReceived(responded))?;

        let response = self.initiator.read(|c| c.response.clone());
        let progress = ProgressReporter::new(self.helpers.clone());
        let resolved = self.race(response.map(&self.state, &progress)).await?;
        Ok(resolved)
    }

    /// Apply `action` and deliver the new state.
    ///
    /// Fails when the listener fails, finished the attempt itself, or aborted
    /// it while handling the state.
    fn dispatch(&mut self, action: RequestAction) -> Result<(), Halt> {
        tracing::trace!(action = action.kind(), "Dispatching");
        self.apply(action);

        self.listener
            .on_change(&self.state, &self.helpers)
            .map_err(Halt::Failed)?;

        if let Some(state) = self.helpers.take_short_circuit() {
            self.state = state;
            return Err(Halt::ShortCircuited);
        }
        if self.helpers.is_aborted() {
            return Err(Halt::Aborted);
        }
        Ok(())
    }

    fn apply(&mut self, action: RequestAction) {
        let reducer = self.initiator.read(|c| Arc::clone(&c.reducer));
        reducer.reduce(&mut self.state, action);
    }

    fn dispatch_progress(&mut self, progress: Value) {
        self.apply(RequestAction::Progress(progress));
        if let Err(error) = self.listener.on_change(&self.state, &self.helpers) {
            tracing::warn!(%error, "Listener failed on progress");
        }
    }

    /// Race `operation` against the abort signal, delivering progress reports
    /// while it runs.
    async fn race<T>(
        &mut self,
        operation: BoxFuture<'static, Result<T, RequestError>>,
    ) -> Result<T, Halt> {
        let settled = settle_once(operation);
        tokio::pin!(settled);

        loop {
            tokio::select! {
                biased;

                () = wait_aborted(&mut self.signals.abort) => return Err(Halt::Aborted),

                Some(progress) = self.signals.progress.recv() => {
                    self.dispatch_progress(progress);
                    if let Some(state) = self.helpers.take_short_circuit() {
                        self.state = state;
                        return Err(Halt::ShortCircuited);
                    }
                },

                result = &mut settled => return result.map_err(Halt::Failed),
            }
        }
    }

    fn settle(mut self, outcome: Result<Value, Halt>) -> Result<RequestState, AttemptError> {
        let action = match outcome {
            Ok(resolved) => RequestAction::RequestSucceeded(resolved),
            Err(Halt::ShortCircuited) => {
                self.helpers.mark_ended();
                tracing::debug!(status = %self.state.status, "Attempt short-circuited");
                metrics::counter!(ATTEMPTS_SHORT_CIRCUITED).increment(1);
                return self.finish();
            },
            Err(Halt::Aborted) => RequestAction::RequestAborted(RequestError::Aborted),
            Err(Halt::Failed(error)) if error.is_abort() => RequestAction::RequestAborted(error),
            Err(Halt::Failed(error)) => RequestAction::RequestFailed(error),
        };

        self.helpers.mark_ended();
        let unsettled = self.state.clone();
        self.apply(action);
        if let Err(error) = self.listener.on_change(&self.state, &self.helpers) {
            tracing::warn!(
                %error,
                status = %self.state.status,
                "Listener failed on terminal state"
            );
            if self.state.status == RequestStatus::Rejected {
                self.record();
                return Err(AttemptError::Listener(error));
            }
            self.reject_instead(unsettled, error)?;
        }
        self.finish()
    }

    /// Settle as rejected by `error` rather than with the refused terminal
    /// state. The rejection is delivered once.
    fn reject_instead(
        &mut self,
        unsettled: RequestState,
        error: RequestError,
    ) -> Result<(), AttemptError> {
        self.state = unsettled;
        self.apply(RequestAction::RequestFailed(error));
        if let Err(error) = self.listener.on_change(&self.state, &self.helpers) {
            tracing::warn!(%error, "Listener failed on rejection");
            self.record();
            return Err(AttemptError::Listener(error));
        }
        Ok(())
    }

    fn finish(self) -> Result<RequestState, AttemptError> {
        self.record();
        let (throw_on_abortions, throw_on_rejections) = self
            .initiator
            .read(|c| (c.throw_on_abortions, c.throw_on_rejections));

        match self.state.status {
            RequestStatus::Aborted if throw_on_abortions => {
                Err(AttemptError::Aborted(Box::new(self.state)))
            },
            RequestStatus::Rejected if throw_on_rejections => {
                Err(AttemptError::Rejected(Box::new(self.state)))
            },
            _ => Ok(self.state),
        }
    }

    fn record(&self) {
        let status = self.state.status;
        tracing::debug!(%status, "Attempt finished");
        metrics::counter!(ATTEMPTS_FINISHED, "status" => status.as_str()).increment(1);
        metrics::histogram!(ATTEMPT_DURATION).record(self.started.elapsed().as_secs_f64());
    }
}

/// Await `operation`, then yield once before handing its output over.
async fn settle_once<F: Future>(operation: F) -> F::Output {
    let output = operation.await;
    tokio::task::yield_now().await;
    output
}

/// Resolves once the attempt is aborted.
async fn wait_aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|aborted| *aborted).await.is_err() {
        // Sender gone: the attempt can no longer be aborted
        std::future::pending::<()>().await;
    }
}
