//! Per-attempt control surface.
//!
//! Every attempt owns one [`RequestHelpers`] handle. Listeners, transports and
//! registry entries use it to abort the attempt, report progress, or finish it
//! early with a state of their own (a short-circuit, used by cache hits). The
//! engine keeps the matching [`AttemptSignals`] and races its suspension
//! points against them.

use crate::state::RequestState;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};

/// Cancellation callback registered by a transport
pub type Aborter = Box<dyn FnOnce() + Send>;

/// Cloneable control handle of one attempt
#[derive(Clone)]
pub struct RequestHelpers {
    control: Arc<AttemptControl>,
}

struct AttemptControl {
    ended: AtomicBool,
    unsubscribed: AtomicBool,
    abort_tx: watch::Sender<bool>,
    aborter: Mutex<Option<Aborter>>,
    short_circuit: Mutex<Option<RequestState>>,
    progress_tx: mpsc::UnboundedSender<Value>,
}

/// Receiving half of an attempt's control channels, held by the engine
#[derive(Debug)]
pub struct AttemptSignals {
    /// Flips to `true` once the attempt is aborted
    pub abort: watch::Receiver<bool>,
    /// Progress payloads in report order
    pub progress: mpsc::UnboundedReceiver<Value>,
}

impl RequestHelpers {
    /// Create the control surface of a new attempt.
    #[must_use]
    pub fn attempt() -> (Self, AttemptSignals) {
        let (abort_tx, abort) = watch::channel(false);
        let (progress_tx, progress) = mpsc::unbounded_channel();

        let helpers = Self {
            control: Arc::new(AttemptControl {
                ended: AtomicBool::new(false),
                unsubscribed: AtomicBool::new(false),
                abort_tx,
                aborter: Mutex::new(None),
                short_circuit: Mutex::new(None),
                progress_tx,
            }),
        };
        (helpers, AttemptSignals { abort, progress })
    }

    /// Helpers of something that is not a running attempt, such as the idle
    /// placeholder. Every operation is a no-op.
    #[must_use]
    pub fn detached() -> Self {
        let (helpers, _signals) = Self::attempt();
        helpers.mark_ended();
        helpers
    }

    /// Abort the attempt.
    ///
    /// Returns `true` when this call performed the abort. Calling it again,
    /// or after the attempt ended, does nothing. The registered aborter, if
    /// any, runs exactly once.
    pub fn abort(&self) -> bool {
        if self.is_ended() {
            return false;
        }

        let flipped = self.control.abort_tx.send_if_modified(|aborted| {
            if *aborted {
                false
            } else {
                *aborted = true;
                true
            }
        });
        if !flipped {
            return false;
        }

        tracing::trace!("Attempt aborted");
        if let Some(aborter) = self.take_aborter() {
            aborter();
        }
        true
    }

    /// Register the callback that cancels the underlying operation.
    ///
    /// Replaces a previously registered aborter. When the attempt is already
    /// aborted the callback runs immediately; when it already ended it is
    /// dropped.
    pub fn register_aborter(&self, aborter: impl FnOnce() + Send + 'static) {
        if self.is_aborted() {
            aborter();
            return;
        }
        if self.is_ended() {
            return;
        }

        *self
            .control
            .aborter
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(aborter));

        // An abort racing the registration above would have missed it
        if self.is_aborted() {
            if let Some(aborter) = self.take_aborter() {
                aborter();
            }
        }
    }

    /// Report intermediate progress. Ignored once the attempt was aborted or
    /// ended.
    pub fn set_progress(&self, progress: Value) {
        if self.is_ended() || self.is_aborted() {
            return;
        }
        // Receiver gone means the engine already finished
        let _ = self.control.progress_tx.send(progress);
    }

    /// Finish the attempt with `state` instead of running the remaining
    /// stages.
    ///
    /// Returns `false`, leaving the attempt untouched, when it already ended.
    pub fn short_circuit(&self, state: RequestState) -> bool {
        if self.control.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self
            .control
            .short_circuit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(state);
        drop(self.take_aborter());
        true
    }

    /// Take the state stored by [`short_circuit`](Self::short_circuit)
    #[must_use]
    pub fn take_short_circuit(&self) -> Option<RequestState> {
        self.control
            .short_circuit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Mark the attempt as finished. Later aborts and progress reports are
    /// no-ops. Returns whether it had already ended.
    pub fn mark_ended(&self) -> bool {
        let was_ended = self.control.ended.swap(true, Ordering::AcqRel);
        drop(self.take_aborter());
        was_ended
    }

    /// Whether the attempt reached its terminal event or was short-circuited
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.control.ended.load(Ordering::Acquire)
    }

    /// Whether [`abort`](Self::abort) took effect
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.control.abort_tx.borrow()
    }

    /// Stop delivering this attempt's events to its owner. The attempt itself
    /// keeps running.
    pub fn unsubscribe(&self) {
        self.control.unsubscribed.store(true, Ordering::Release);
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) was called
    #[must_use]
    pub fn is_unsubscribed(&self) -> bool {
        self.control.unsubscribed.load(Ordering::Acquire)
    }

    /// Whether both handles control the same attempt
    #[must_use]
    pub fn same_attempt(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.control, &other.control)
    }

    fn take_aborter(&self) -> Option<Aborter> {
        self.control
            .aborter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for RequestHelpers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHelpers")
            .field("ended", &self.is_ended())
            .field("aborted", &self.is_aborted())
            .field("unsubscribed", &self.is_unsubscribed())
            .finish()
    }
}
