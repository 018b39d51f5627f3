//! Property tests for the default request reducer.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use request_lifecycle_core::{Reducer, RequestAction, RequestState, RequestStateReducer, RequestStatus};
use request_lifecycle_testing::properties::{arb_lifecycle, arb_stage_action};
use request_lifecycle_testing::reducer_test::assertions::assert_pending_matches_status;

proptest! {
    #[test]
    fn pending_always_matches_status(actions in arb_lifecycle(12)) {
        let mut state = RequestState::idle();
        for action in actions {
            RequestStateReducer.reduce(&mut state, action);
            assert_pending_matches_status(&state);
        }
    }

    #[test]
    fn status_never_moves_backwards(actions in arb_lifecycle(12)) {
        let mut state = RequestState::idle();
        let mut previous: Option<RequestStatus> = None;
        for action in actions {
            RequestStateReducer.reduce(&mut state, action);
            if let Some(before) = previous {
                prop_assert!(before == state.status || before.can_advance_to(state.status));
            }
            previous = Some(state.status);
        }
    }

    #[test]
    fn terminal_states_are_final(actions in arb_lifecycle(12), extra in arb_stage_action()) {
        let mut state = RequestState::idle();
        for action in actions {
            RequestStateReducer.reduce(&mut state, action);
        }
        prop_assume!(state.is_terminal());

        let status = state.status;
        let id = state.request_id;
        RequestStateReducer.reduce(&mut state, extra);
        prop_assert_eq!(state.status, status);
        prop_assert_eq!(state.request_id, id);
    }

    #[test]
    fn init_always_starts_over(actions in arb_lifecycle(8), restart in arb_lifecycle(1)) {
        let mut state = RequestState::idle();
        for action in actions {
            RequestStateReducer.reduce(&mut state, action);
        }
        let init = restart.into_iter().next().unwrap();
        let RequestAction::Init { request_id, .. } = &init else {
            unreachable!("lifecycles start with init");
        };
        let request_id = *request_id;

        RequestStateReducer.reduce(&mut state, init);
        prop_assert_eq!(state.request_id, Some(request_id));
        prop_assert!(state.params.is_none());
        prop_assert!(state.resolved.is_none());
        prop_assert!(state.pending);
    }
}
