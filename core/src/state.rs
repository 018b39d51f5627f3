//! Request state snapshots.
//!
//! A [`RequestState`] describes one attempt at one point of its lifecycle.
//! States are plain owned data: cloneable, comparable and serializable, so
//! they can be stored in cache buckets and handed to UI bindings freely.

use crate::error::RequestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of one request attempt.
///
/// Ids are unique for the lifetime of the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    /// Allocate a fresh id
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for logging
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Lifecycle status of an attempt.
///
/// ```text
/// idle ─▶ init ─▶ prepared ─▶ requested ─▶ resolved | aborted | rejected
/// ```
///
/// `Idle` only describes the placeholder shown before any attempt exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// No attempt has started
    #[default]
    Idle,
    /// Attempt created, request description not known yet
    Init,
    /// Request description (params) resolved
    Prepared,
    /// Transport invoked
    Requested,
    /// Response mapped successfully
    Resolved,
    /// Cancelled before completion
    Aborted,
    /// Failed in any stage
    Rejected,
}

impl RequestStatus {
    /// Whether an attempt in this status is still in flight
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Init | Self::Prepared | Self::Requested)
    }

    /// Whether this status ends an attempt
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Aborted | Self::Rejected)
    }

    /// Position along the lifecycle graph. Terminal statuses share a rank.
    const fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Init => 1,
            Self::Prepared => 2,
            Self::Requested => 3,
            Self::Resolved | Self::Aborted | Self::Rejected => 4,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Staying on the same non-terminal status is allowed; leaving a terminal
    /// status is not.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    /// Lowercase name, as used on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Init => "init",
            Self::Prepared => "prepared",
            Self::Requested => "requested",
            Self::Resolved => "resolved",
            Self::Aborted => "aborted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of an operation handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requested {
    /// When the transport was invoked
    pub sent_at: DateTime<Utc>,
}

/// Raw transport result: a success flag, a status code and a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the transport considers the response successful
    pub ok: bool,
    /// Transport status code (HTTP status for HTTP transports)
    pub status: u16,
    /// Undecoded body
    pub body: Vec<u8>,
}

impl Response {
    /// Build a response, deriving `ok` from a 2xx status
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            ok: (200..300).contains(&status),
            status,
            body: body.into(),
        }
    }

    /// Build a response whose body is the JSON encoding of `value`
    #[must_use]
    pub fn json_body(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    /// Decode the body as JSON.
    ///
    /// An empty body decodes to `null`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Decode`] when the body is not valid JSON.
    pub fn json(&self) -> Result<Value, RequestError> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body).map_err(|e| RequestError::Decode(e.to_string()))
    }
}

/// One lifecycle snapshot of a request attempt
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestState {
    /// Attempt identity, `None` only on the idle placeholder
    pub request_id: Option<RequestId>,
    /// Current lifecycle status
    pub status: RequestStatus,
    /// Mirrors `status.is_pending()`
    pub pending: bool,
    /// Arguments the attempt was triggered with
    pub args: Vec<Value>,
    /// Request description produced from `args`
    pub params: Option<Value>,
    /// Descriptor of the transport invocation
    pub requested: Option<Requested>,
    /// Raw transport result
    pub responded: Option<Response>,
    /// Mapped result
    pub resolved: Option<Value>,
    /// Failure or abort reason
    pub rejected: Option<RequestError>,
    /// Last reported progress payload
    pub progress: Option<Value>,
    /// Fields merged in by custom events
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl RequestState {
    /// The placeholder shown before any attempt exists
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// Fresh state of a new attempt
    #[must_use]
    pub fn init(request_id: RequestId, args: Vec<Value>) -> Self {
        Self {
            request_id: Some(request_id),
            status: RequestStatus::Init,
            pending: true,
            args,
            ..Self::default()
        }
    }

    /// Move to `status`, keeping `pending` in agreement with it
    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
        self.pending = status.is_pending();
    }

    /// Whether the attempt has ended
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Copy the response fields of a cached state into this one and mark it
    /// resolved. Identity, args and params stay those of `self`.
    pub fn splice_cached(&mut self, cached: &Self) {
        self.responded.clone_from(&cached.responded);
        self.resolved.clone_from(&cached.resolved);
        self.rejected = None;
        self.set_status(RequestStatus::Resolved);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_status_pending_membership() {
        assert!(!RequestStatus::Idle.is_pending());
        assert!(RequestStatus::Init.is_pending());
        assert!(RequestStatus::Prepared.is_pending());
        assert!(RequestStatus::Requested.is_pending());
        assert!(!RequestStatus::Resolved.is_pending());
        assert!(!RequestStatus::Aborted.is_pending());
        assert!(!RequestStatus::Rejected.is_pending());
    }

    #[test]
    fn test_status_advances_forward_only() {
        assert!(RequestStatus::Init.can_advance_to(RequestStatus::Prepared));
        assert!(RequestStatus::Prepared.can_advance_to(RequestStatus::Prepared));
        assert!(RequestStatus::Init.can_advance_to(RequestStatus::Aborted));
        assert!(!RequestStatus::Requested.can_advance_to(RequestStatus::Prepared));
        assert!(!RequestStatus::Resolved.can_advance_to(RequestStatus::Aborted));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let encoded = serde_json::to_string(&RequestStatus::Requested).unwrap();
        assert_eq!(encoded, "\"requested\"");
        assert_eq!(RequestStatus::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_response_json_decodes_body() {
        let response = Response::json_body(200, &json!({"a": 1}));
        assert!(response.ok);
        assert_eq!(response.json().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_response_json_rejects_garbage() {
        let response = Response::new(200, "not json");
        assert!(matches!(response.json(), Err(RequestError::Decode(_))));
    }

    #[test]
    fn test_response_ok_follows_status() {
        assert!(!Response::new(404, "").ok);
        assert!(Response::new(204, "").ok);
        assert_eq!(Response::new(204, "").json().unwrap(), Value::Null);
    }

    #[test]
    fn test_splice_cached_keeps_identity() {
        let id = RequestId::next();
        let mut state = RequestState::init(id, vec![json!("x")]);
        state.params = Some(json!({"url": "/x"}));
        state.set_status(RequestStatus::Prepared);

        let mut cached = RequestState::init(RequestId::next(), vec![json!("y")]);
        cached.resolved = Some(json!({"a": 1}));
        cached.set_status(RequestStatus::Resolved);

        state.splice_cached(&cached);
        assert_eq!(state.request_id, Some(id));
        assert_eq!(state.args, vec![json!("x")]);
        assert_eq!(state.resolved, Some(json!({"a": 1})));
        assert_eq!(state.status, RequestStatus::Resolved);
        assert!(!state.pending);
    }
}
