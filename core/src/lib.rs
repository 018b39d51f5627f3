//! # Request Lifecycle Core
//!
//! Core traits and types for driving asynchronous requests through a fixed
//! lifecycle:
//!
//! ```text
//! idle ─▶ init ─▶ prepared ─▶ requested ─▶ resolved | aborted | rejected
//! ```
//!
//! ## Core Concepts
//!
//! - **State**: [`RequestState`], one lifecycle snapshot of an attempt
//! - **Action**: [`RequestAction`], one stage transition
//! - **Reducer**: pure function `(State, Action) → State`
//! - **Listener**: [`StateListener`], receives every new state with the
//!   attempt's [`RequestHelpers`]
//! - **Cache policy**: [`CachePolicy`], a listener decorator that answers
//!   requests from a [`CacheStore`]
//!
//! This crate holds no executor. The engine that runs attempts lives in
//! `request-lifecycle-runtime`.
//!
//! ## Example
//!
//! ```
//! use request_lifecycle_core::{
//!     Reducer, RequestAction, RequestId, RequestState, RequestStateReducer,
//! };
//! use serde_json::json;
//!
//! let mut state = RequestState::idle();
//! RequestStateReducer.reduce(
//!     &mut state,
//!     RequestAction::Init { request_id: RequestId::next(), args: vec![json!({"url": "/x"})] },
//! );
//! assert!(state.pending);
//!
//! RequestStateReducer.reduce(&mut state, RequestAction::RequestSucceeded(json!({"a": 1})));
//! assert!(!state.pending);
//! ```

pub mod action;
pub mod cache;
pub mod composition;
pub mod environment;
pub mod error;
pub mod helpers;
pub mod listener;
pub mod reducer;
pub mod state;

pub use action::{RequestAction, StatePatch};
pub use cache::{
    CacheIdFn, CacheKeySource, CachePolicy, CacheStore, FetchPolicy, MemoryBucket,
    SharedCacheStore,
};
pub use environment::{Clock, SharedClock, SystemClock};
pub use error::{CacheError, ConfigError, RequestError};
pub use helpers::{AttemptSignals, RequestHelpers};
pub use listener::{NoopListener, SharedListener, StateListener};
pub use reducer::{Reducer, RequestStateReducer, SharedRequestReducer};
pub use state::{RequestId, RequestState, RequestStatus, Requested, Response};
