//! Collaborators invoked by the engine: the transport that performs a
//! request and the mappers on either side of it.

use futures::future::BoxFuture;
use request_lifecycle_core::{RequestError, RequestHelpers, RequestState, Response};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a transport may do to the attempt it serves
#[derive(Debug, Clone)]
pub struct PerformContext {
    helpers: RequestHelpers,
}

impl PerformContext {
    /// Context bound to one attempt
    #[must_use]
    pub const fn new(helpers: RequestHelpers) -> Self {
        Self { helpers }
    }

    /// Register the callback that cancels the in-flight operation.
    ///
    /// Only the last registered aborter is kept; it runs at most once. If the
    /// attempt was aborted already it runs immediately.
    pub fn register_aborter(&self, aborter: impl FnOnce() + Send + 'static) {
        self.helpers.register_aborter(aborter);
    }

    /// Report intermediate progress
    pub fn set_progress(&self, progress: Value) {
        self.helpers.set_progress(progress);
    }

    /// Reporter that can be moved into the operation
    #[must_use]
    pub fn progress_reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.helpers.clone())
    }

    /// Whether the attempt was aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.helpers.is_aborted()
    }
}

/// Cloneable progress sink of one attempt
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    helpers: RequestHelpers,
}

impl ProgressReporter {
    /// Reporter bound to one attempt
    #[must_use]
    pub const fn new(helpers: RequestHelpers) -> Self {
        Self { helpers }
    }

    /// Report intermediate progress. Ignored once the attempt ended.
    pub fn report(&self, progress: Value) {
        self.helpers.set_progress(progress);
    }
}

/// Performs the request described by `state.params`.
///
/// `perform` is called once per attempt, right after the `prepared` state.
/// The returned future is raced against the abort signal, so transports only
/// need an aborter to release resources early.
pub trait Transport: Send + Sync {
    /// Start the request
    fn perform(
        &self,
        state: &RequestState,
        ctx: &PerformContext,
    ) -> BoxFuture<'static, Result<Response, RequestError>>;
}

impl<F> Transport for F
where
    F: Fn(&RequestState, &PerformContext) -> BoxFuture<'static, Result<Response, RequestError>>
        + Send
        + Sync,
{
    fn perform(
        &self,
        state: &RequestState,
        ctx: &PerformContext,
    ) -> BoxFuture<'static, Result<Response, RequestError>> {
        self(state, ctx)
    }
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn Transport>;

type MapRequestFn =
    dyn Fn(&[Value]) -> BoxFuture<'static, Result<Value, RequestError>> + Send + Sync;

/// Turns trigger arguments into request params.
#[derive(Clone)]
pub enum RequestMapper {
    /// Fixed params, whatever the arguments
    Value(Value),
    /// Params computed from the arguments
    Function(Arc<MapRequestFn>),
}

impl RequestMapper {
    /// Fixed params
    #[must_use]
    pub const fn value(params: Value) -> Self {
        Self::Value(params)
    }

    /// Params computed synchronously
    #[must_use]
    pub fn sync<F>(map: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RequestError> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(
            move |args: &[Value]| -> BoxFuture<'static, Result<Value, RequestError>> {
                let params = map(args);
                Box::pin(std::future::ready(params))
            },
        ))
    }

    /// Params computed asynchronously
    #[must_use]
    pub fn future<F, Fut>(map: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RequestError>> + Send + 'static,
    {
        Self::Function(Arc::new(
            move |args: &[Value]| -> BoxFuture<'static, Result<Value, RequestError>> {
                Box::pin(map(args.to_vec()))
            },
        ))
    }

    /// Whether params depend on the arguments
    #[must_use]
    pub const fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// The fixed params, if any
    #[must_use]
    pub const fn plain_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Function(_) => None,
        }
    }

    pub(crate) fn map(&self, args: &[Value]) -> BoxFuture<'static, Result<Value, RequestError>> {
        match self {
            Self::Value(value) => Box::pin(std::future::ready(Ok(value.clone()))),
            Self::Function(map) => map(args),
        }
    }
}

impl Default for RequestMapper {
    /// The first argument is the params; no argument means `null`
    fn default() -> Self {
        Self::sync(|args| Ok(args.first().cloned().unwrap_or(Value::Null)))
    }
}

impl fmt::Debug for RequestMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

type MapResponseFn = dyn Fn(&RequestState, &ProgressReporter) -> BoxFuture<'static, MapResult>
    + Send
    + Sync;

type MapResult = Result<Value, RequestError>;

/// Turns the raw response of a state into its resolved value
#[derive(Clone)]
pub struct ResponseMapper {
    map: Arc<MapResponseFn>,
}

impl ResponseMapper {
    /// Mapper computed synchronously
    #[must_use]
    pub fn sync<F>(map: F) -> Self
    where
        F: Fn(&RequestState) -> Result<Value, RequestError> + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(
                move |state: &RequestState,
                      _: &ProgressReporter|
                      -> BoxFuture<'static, Result<Value, RequestError>> {
                    let resolved = map(state);
                    Box::pin(std::future::ready(resolved))
                },
            ),
        }
    }

    /// Mapper computed asynchronously. It receives a snapshot of the state
    /// and a progress reporter.
    #[must_use]
    pub fn future<F, Fut>(map: F) -> Self
    where
        F: Fn(RequestState, ProgressReporter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RequestError>> + Send + 'static,
    {
        Self {
            map: Arc::new(
                move |state: &RequestState,
                      progress: &ProgressReporter|
                      -> BoxFuture<'static, Result<Value, RequestError>> {
                    Box::pin(map(state.clone(), progress.clone()))
                },
            ),
        }
    }

    /// Decode `responded` as JSON.
    ///
    /// A response that is not ok fails with [`RequestError::Response`]
    /// carrying the decoded body.
    #[must_use]
    pub fn json() -> Self {
        Self::sync(|state| {
            let responded = state
                .responded
                .as_ref()
                .ok_or_else(|| RequestError::Mapping("no response to map".into()))?;
            let parsed = responded.json()?;
            if responded.ok {
                Ok(parsed)
            } else {
                Err(RequestError::Response {
                    status: responded.status,
                    body: parsed,
                })
            }
        })
    }

    pub(crate) fn map(
        &self,
        state: &RequestState,
        progress: &ProgressReporter,
    ) -> BoxFuture<'static, Result<Value, RequestError>> {
        (self.map)(state, progress)
    }
}

impl Default for ResponseMapper {
    fn default() -> Self {
        Self::json()
    }
}

impl fmt::Debug for ResponseMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseMapper").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use request_lifecycle_core::RequestId;
    use serde_json::json;

    fn responded(response: Response) -> RequestState {
        let mut state = RequestState::init(RequestId::next(), vec![]);
        state.responded = Some(response);
        state
    }

    fn reporter() -> ProgressReporter {
        ProgressReporter::new(RequestHelpers::detached())
    }

    #[tokio::test]
    async fn test_default_request_mapper_uses_first_arg() {
        let mapper = RequestMapper::default();
        assert!(mapper.is_function());
        let params = mapper.map(&[json!({"url": "/x"}), json!(2)]).await.unwrap();
        assert_eq!(params, json!({"url": "/x"}));
        assert_eq!(mapper.map(&[]).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_value_mapper_ignores_args() {
        let mapper = RequestMapper::value(json!({"url": "/fixed"}));
        assert_eq!(mapper.plain_value(), Some(&json!({"url": "/fixed"})));
        assert_eq!(mapper.map(&[json!(1)]).await.unwrap(), json!({"url": "/fixed"}));
    }

    #[tokio::test]
    async fn test_async_request_mapper() {
        let mapper = RequestMapper::future(|args| async move {
            Ok(json!({"url": format!("/items/{}", args[0])}))
        });
        assert_eq!(mapper.map(&[json!(7)]).await.unwrap(), json!({"url": "/items/7"}));
    }

    #[tokio::test]
    async fn test_json_mapper_decodes_ok_response() {
        let state = responded(Response::json_body(200, &json!({"a": 1})));
        let resolved = ResponseMapper::json().map(&state, &reporter()).await.unwrap();
        assert_eq!(resolved, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_json_mapper_fails_with_body_when_not_ok() {
        let state = responded(Response::json_body(422, &json!({"error": "invalid"})));
        let error = ResponseMapper::json().map(&state, &reporter()).await.unwrap_err();
        assert_eq!(
            error,
            RequestError::Response {
                status: 422,
                body: json!({"error": "invalid"}),
            }
        );
    }

    #[tokio::test]
    async fn test_json_mapper_without_response() {
        let state = RequestState::init(RequestId::next(), vec![]);
        let error = ResponseMapper::default().map(&state, &reporter()).await.unwrap_err();
        assert!(matches!(error, RequestError::Mapping(_)));
    }
}
