//! Reducer composition utilities
//!
//! [`combine_reducers`] runs several reducers over the same state and action,
//! in order. The usual use is layering a custom reducer after the default
//! lifecycle reducer:
//!
//! ```
//! use request_lifecycle_core::action::RequestAction;
//! use request_lifecycle_core::composition::combine_reducers;
//! use request_lifecycle_core::reducer::{Reducer, RequestStateReducer};
//! use request_lifecycle_core::state::RequestState;
//! use serde_json::json;
//!
//! /// Counts every progress report in `meta`
//! struct ProgressCounter;
//!
//! impl Reducer for ProgressCounter {
//!     type State = RequestState;
//!     type Action = RequestAction;
//!
//!     fn reduce(&self, state: &mut RequestState, action: RequestAction) {
//!         if matches!(action, RequestAction::Progress(_)) {
//!             let seen = state.meta.get("reports").and_then(|v| v.as_u64()).unwrap_or(0);
//!             state.meta.insert("reports".into(), json!(seen + 1));
//!         }
//!     }
//! }
//!
//! let reducer = combine_reducers(vec![Box::new(RequestStateReducer), Box::new(ProgressCounter)]);
//! let mut state = RequestState::default();
//! reducer.reduce(&mut state, RequestAction::Progress(json!(0.5)));
//! assert_eq!(state.meta["reports"], json!(1));
//! ```

use crate::reducer::Reducer;

/// Combines multiple reducers that operate on the same state and action types.
///
/// Each reducer sees the state left by the previous one and its own clone of
/// the action.
#[must_use]
pub fn combine_reducers<S, A>(
    reducers: Vec<Box<dyn Reducer<State = S, Action = A>>>,
) -> CombinedReducer<S, A>
where
    S: 'static,
    A: Clone + 'static,
{
    CombinedReducer { reducers }
}

/// A combined reducer that runs multiple reducers in sequence.
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S, A>
where
    S: 'static,
    A: Clone + 'static,
{
    reducers: Vec<Box<dyn Reducer<State = S, Action = A>>>,
}

impl<S, A> CombinedReducer<S, A>
where
    S: 'static,
    A: Clone + 'static,
{
    /// Number of combined reducers
    #[must_use]
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Whether no reducer was combined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<S, A> Reducer for CombinedReducer<S, A>
where
    S: 'static,
    A: Clone + 'static,
{
    type State = S;
    type Action = A;

    fn reduce(&self, state: &mut Self::State, action: Self::Action) {
        for reducer in &self.reducers {
            reducer.reduce(state, action.clone());
        }
    }
}
