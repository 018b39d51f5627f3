//! State-change listeners.
//!
//! The engine hands every new state, together with the attempt's helpers, to
//! a single [`StateListener`]. Cache policies and the request manager are both
//! listeners; decorators wrap an inner listener and decide what reaches it.

use crate::error::RequestError;
use crate::helpers::RequestHelpers;
use crate::state::RequestState;
use std::sync::Arc;

/// Receives each state an attempt goes through, in lifecycle order.
///
/// Closures of the matching shape implement this trait:
///
/// ```
/// use request_lifecycle_core::listener::StateListener;
/// use request_lifecycle_core::{RequestError, RequestHelpers, RequestState};
///
/// let listener = |state: &RequestState, _helpers: &RequestHelpers| -> Result<(), RequestError> {
///     println!("{}", state.status);
///     Ok(())
/// };
/// listener.on_change(&RequestState::idle(), &RequestHelpers::detached()).ok();
/// ```
pub trait StateListener: Send + Sync {
    /// Handle one new state.
    ///
    /// # Errors
    ///
    /// A failure is reported to whoever drives the attempt. Failures while
    /// handling intermediate states reject the attempt.
    fn on_change(&self, state: &RequestState, helpers: &RequestHelpers)
    -> Result<(), RequestError>;
}

impl<F> StateListener for F
where
    F: Fn(&RequestState, &RequestHelpers) -> Result<(), RequestError> + Send + Sync,
{
    fn on_change(
        &self,
        state: &RequestState,
        helpers: &RequestHelpers,
    ) -> Result<(), RequestError> {
        self(state, helpers)
    }
}

/// Shared listener handle
pub type SharedListener = Arc<dyn StateListener>;

/// Listener that ignores every state
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl StateListener for NoopListener {
    fn on_change(&self, _: &RequestState, _: &RequestHelpers) -> Result<(), RequestError> {
        Ok(())
    }
}
