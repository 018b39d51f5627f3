//! Reducers: pure state transitions driven by lifecycle actions.
//!
//! [`RequestStateReducer`] implements the request lifecycle. Callers can
//! replace it, or layer extra reducers after it with
//! [`combine_reducers`](crate::composition::combine_reducers).

use crate::action::{RequestAction, StatePatch};
use crate::state::{RequestState, RequestStatus};
use std::sync::Arc;

/// The Reducer trait - core abstraction for state transitions
///
/// Reducers are pure: given the same state and action they always produce
/// the same new state, never fail, and perform no I/O. All side effects live
/// in the engine that drives them.
///
/// # Example
///
/// ```
/// use request_lifecycle_core::reducer::Reducer;
///
/// struct Counter;
///
/// impl Reducer for Counter {
///     type State = u32;
///     type Action = u32;
///
///     fn reduce(&self, state: &mut u32, action: u32) {
///         *state += action;
///     }
/// }
///
/// let mut total = 0;
/// Counter.reduce(&mut total, 2);
/// assert_eq!(total, 2);
/// ```
pub trait Reducer: Send + Sync {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// Apply `action` to `state` in place
    fn reduce(&self, state: &mut Self::State, action: Self::Action);
}

/// Reducer over request states, as stored by the engine
pub type SharedRequestReducer =
    Arc<dyn Reducer<State = RequestState, Action = RequestAction>>;

/// The default request lifecycle reducer.
///
/// Stage actions only ever move the status forward; a stage action that would
/// move it backwards, or that arrives after a terminal status, is ignored.
/// [`RequestAction::Init`] always starts over with a fresh state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestStateReducer;

impl RequestStateReducer {
    /// Shared handle to the default reducer
    #[must_use]
    pub fn shared() -> SharedRequestReducer {
        Arc::new(Self)
    }
}

impl Reducer for RequestStateReducer {
    type State = RequestState;
    type Action = RequestAction;

    fn reduce(&self, state: &mut RequestState, action: RequestAction) {
        match action {
            RequestAction::Init { request_id, args } => {
                *state = RequestState::init(request_id, args);
            },
            RequestAction::Progress(progress) => {
                state.progress = Some(progress);
            },
            RequestAction::ParamsDefined(params) => {
                if advance(state, RequestStatus::Prepared) {
                    state.params = Some(params);
                }
            },
            RequestAction::RequestSent(requested) => {
                if advance(state, RequestStatus::Requested) {
                    state.requested = Some(requested);
                }
            },
            RequestAction::ResponseReceived(responded) => {
                if !state.is_terminal() {
                    state.responded = Some(responded);
                }
            },
            RequestAction::RequestSucceeded(resolved) => {
                if advance(state, RequestStatus::Resolved) {
                    state.resolved = Some(resolved);
                }
            },
            RequestAction::RequestAborted(error) => {
                if advance(state, RequestStatus::Aborted) {
                    state.rejected = Some(error);
                }
            },
            RequestAction::RequestFailed(error) => {
                if advance(state, RequestStatus::Rejected) {
                    state.rejected = Some(error);
                }
            },
            RequestAction::Custom(patch) => merge(state, patch),
        }
    }
}

/// Move `state` to `next` when that is a forward transition.
fn advance(state: &mut RequestState, next: RequestStatus) -> bool {
    if state.status.can_advance_to(next) {
        state.set_status(next);
        true
    } else {
        tracing::trace!(from = %state.status, to = %next, "Ignoring backward transition");
        false
    }
}

fn merge(state: &mut RequestState, patch: StatePatch) {
    let StatePatch {
        args,
        params,
        responded,
        resolved,
        rejected,
        progress,
        meta,
    } = patch;

    if let Some(args) = args {
        state.args = args;
    }
    if params.is_some() {
        state.params = params;
    }
    if responded.is_some() {
        state.responded = responded;
    }
    if resolved.is_some() {
        state.resolved = resolved;
    }
    if rejected.is_some() {
        state.rejected = rejected;
    }
    if progress.is_some() {
        state.progress = progress;
    }
    state.meta.extend(meta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::state::{RequestId, Requested, Response};
    use chrono::Utc;
    use serde_json::json;

    fn run(actions: Vec<RequestAction>) -> RequestState {
        let mut state = RequestState::default();
        for action in actions {
            RequestStateReducer.reduce(&mut state, action);
        }
        state
    }

    fn init() -> RequestAction {
        RequestAction::Init {
            request_id: RequestId::next(),
            args: vec![json!({"url": "/x"})],
        }
    }

    #[test]
    fn test_init_resets_state() {
        let mut state = RequestState::idle();
        state.resolved = Some(json!("stale"));
        state.meta.insert("k".into(), json!(1));

        let id = RequestId::next();
        RequestStateReducer.reduce(
            &mut state,
            RequestAction::Init {
                request_id: id,
                args: vec![json!(1)],
            },
        );

        assert_eq!(state.request_id, Some(id));
        assert_eq!(state.status, RequestStatus::Init);
        assert!(state.pending);
        assert_eq!(state.args, vec![json!(1)]);
        assert!(state.resolved.is_none());
        assert!(state.meta.is_empty());
    }

    #[test]
    fn test_full_success_lifecycle() {
        let state = run(vec![
            init(),
            RequestAction::ParamsDefined(json!({"url": "/x"})),
            RequestAction::RequestSent(Requested { sent_at: Utc::now() }),
            RequestAction::ResponseReceived(Response::json_body(200, &json!({"a": 1}))),
            RequestAction::RequestSucceeded(json!({"a": 1})),
        ]);

        assert_eq!(state.status, RequestStatus::Resolved);
        assert!(!state.pending);
        assert_eq!(state.params, Some(json!({"url": "/x"})));
        assert!(state.requested.is_some());
        assert!(state.responded.is_some());
        assert_eq!(state.resolved, Some(json!({"a": 1})));
    }

    #[test]
    fn test_response_received_keeps_status() {
        let state = run(vec![
            init(),
            RequestAction::ParamsDefined(json!(null)),
            RequestAction::RequestSent(Requested { sent_at: Utc::now() }),
            RequestAction::ResponseReceived(Response::new(200, "")),
        ]);
        assert_eq!(state.status, RequestStatus::Requested);
        assert!(state.pending);
    }

    #[test]
    fn test_abort_keeps_payload_and_sets_rejected() {
        let state = run(vec![
            init(),
            RequestAction::ParamsDefined(json!({"url": "/x"})),
            RequestAction::RequestAborted(RequestError::Aborted),
        ]);
        assert_eq!(state.status, RequestStatus::Aborted);
        assert!(!state.pending);
        assert_eq!(state.rejected, Some(RequestError::Aborted));
        assert_eq!(state.params, Some(json!({"url": "/x"})));
    }

    #[test]
    fn test_failure_sets_rejected() {
        let error = RequestError::Mapping("bad params".into());
        let state = run(vec![init(), RequestAction::RequestFailed(error.clone())]);
        assert_eq!(state.status, RequestStatus::Rejected);
        assert_eq!(state.rejected, Some(error));
    }

    #[test]
    fn test_progress_does_not_touch_status() {
        let state = run(vec![init(), RequestAction::Progress(json!({"loaded": 10}))]);
        assert_eq!(state.status, RequestStatus::Init);
        assert_eq!(state.progress, Some(json!({"loaded": 10})));
    }

    #[test]
    fn test_only_one_terminal_status() {
        let state = run(vec![
            init(),
            RequestAction::RequestSucceeded(json!(1)),
            RequestAction::RequestAborted(RequestError::Aborted),
            RequestAction::RequestFailed(RequestError::Transport("late".into())),
        ]);
        assert_eq!(state.status, RequestStatus::Resolved);
        assert!(state.rejected.is_none());
    }

    #[test]
    fn test_backward_transition_ignored() {
        let state = run(vec![
            init(),
            RequestAction::ParamsDefined(json!("first")),
            RequestAction::RequestSent(Requested { sent_at: Utc::now() }),
            RequestAction::ParamsDefined(json!("second")),
        ]);
        assert_eq!(state.status, RequestStatus::Requested);
        assert_eq!(state.params, Some(json!("first")));
    }

    #[test]
    fn test_custom_patch_merges_without_status_change() {
        let mut patch = StatePatch::meta("source", json!("ui"));
        patch.resolved = Some(json!("optimistic"));

        let state = run(vec![init(), RequestAction::Custom(patch)]);
        assert_eq!(state.status, RequestStatus::Init);
        assert!(state.pending);
        assert_eq!(state.resolved, Some(json!("optimistic")));
        assert_eq!(state.meta.get("source"), Some(&json!("ui")));
    }
}
