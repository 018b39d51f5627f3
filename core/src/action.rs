//! Lifecycle events fed into request reducers.

use crate::error::RequestError;
use crate::state::{RequestId, Requested, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One stage transition of an attempt.
///
/// The engine emits exactly one action per transition, in lifecycle order.
/// [`RequestAction::Custom`] is an escape hatch for caller-defined events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RequestAction {
    /// A new attempt started
    Init {
        /// Identity of the new attempt
        request_id: RequestId,
        /// Arguments it was triggered with
        args: Vec<Value>,
    },
    /// Intermediate progress was reported
    Progress(Value),
    /// The request description is known
    ParamsDefined(Value),
    /// The transport was invoked
    RequestSent(Requested),
    /// The transport produced a raw response
    ResponseReceived(Response),
    /// The response was mapped to its final value
    RequestSucceeded(Value),
    /// The attempt was cancelled
    RequestAborted(RequestError),
    /// The attempt failed
    RequestFailed(RequestError),
    /// Caller-defined event, merged into the state without touching status
    Custom(StatePatch),
}

impl RequestAction {
    /// Short name used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Progress(_) => "progress",
            Self::ParamsDefined(_) => "params_defined",
            Self::RequestSent(_) => "request_sent",
            Self::ResponseReceived(_) => "response_received",
            Self::RequestSucceeded(_) => "request_succeeded",
            Self::RequestAborted(_) => "request_aborted",
            Self::RequestFailed(_) => "request_failed",
            Self::Custom(_) => "custom",
        }
    }
}

/// Shallow patch applied by [`RequestAction::Custom`].
///
/// Every `Some` field overwrites the matching state field; `meta` entries are
/// merged key by key. Status and `pending` cannot be patched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatePatch {
    /// Replacement arguments
    pub args: Option<Vec<Value>>,
    /// Replacement params
    pub params: Option<Value>,
    /// Replacement raw response
    pub responded: Option<Response>,
    /// Replacement mapped result
    pub resolved: Option<Value>,
    /// Replacement rejection
    pub rejected: Option<RequestError>,
    /// Replacement progress
    pub progress: Option<Value>,
    /// Extra fields
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl StatePatch {
    /// Patch carrying a single `meta` entry
    #[must_use]
    pub fn meta(key: impl Into<String>, value: Value) -> Self {
        let mut meta = Map::new();
        meta.insert(key.into(), value);
        Self {
            meta,
            ..Self::default()
        }
    }
}
