//! HTTP transport backed by `reqwest`.
//!
//! The request params are read as:
//!
//! ```json
//! { "url": "https://api.example.com/items", "method": "POST",
//!   "headers": { "x-token": "abc" }, "body": { "name": "x" } }
//! ```
//!
//! Only `url` is required. A string body is sent as-is, any other body is
//! sent as JSON. Aborting the attempt cancels the in-flight request.

use crate::transport::{PerformContext, Transport};
use futures::FutureExt;
use futures::future::BoxFuture;
use request_lifecycle_core::{RequestError, RequestState, Response};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Transport sending each attempt's params as an HTTP request
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
    base_url: Option<String>,
}

impl HttpTransport {
    /// Transport with a default client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport around an existing client
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    /// Prefix for relative urls
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn url(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.contains("://") => {
                format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
            },
            _ => url.to_string(),
        }
    }

    fn build(&self, params: &HttpParams) -> Result<reqwest::RequestBuilder, RequestError> {
        let method = Method::from_bytes(params.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| RequestError::Mapping(format!("invalid method {}: {e}", params.method)))?;

        let mut builder = self.client.request(method, self.url(&params.url));
        for (name, value) in &params.headers {
            if let Some(value) = value.as_str() {
                builder = builder.header(name.as_str(), value);
            }
        }
        builder = match &params.body {
            None | Some(Value::Null) => builder,
            Some(Value::String(text)) => builder.body(text.clone()),
            Some(body) => builder.json(body),
        };
        Ok(builder)
    }
}

/// Request params understood by [`HttpTransport`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpParams {
    /// Absolute url, or a path joined to the base url
    pub url: String,
    /// HTTP method, case-insensitive
    #[serde(default = "default_method")]
    pub method: String,
    /// Request headers
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// Request body
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpParams {
    /// Read params from a request state
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Mapping`] when the params are missing or
    /// malformed.
    pub fn from_state(state: &RequestState) -> Result<Self, RequestError> {
        let params = state
            .params
            .clone()
            .ok_or_else(|| RequestError::Mapping("request has no params".to_string()))?;
        let mut parsed: Self = serde_json::from_value(params)
            .map_err(|e| RequestError::Mapping(format!("invalid http params: {e}")))?;
        parsed.headers.retain(|name, value| {
            let keep = value.is_string();
            if !keep {
                tracing::warn!(header = %name, "Dropping non-string header value");
            }
            keep
        });
        Ok(parsed)
    }
}

impl Transport for HttpTransport {
    fn perform(
        &self,
        state: &RequestState,
        ctx: &PerformContext,
    ) -> BoxFuture<'static, Result<Response, RequestError>> {
        let request = match HttpParams::from_state(state).and_then(|params| self.build(&params)) {
            Ok(request) => request,
            Err(error) => return futures::future::ready(Err(error)).boxed(),
        };

        let task = tokio::spawn(async move {
            let response = request
                .send()
                .await
                .map_err(|e| RequestError::Transport(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| RequestError::Transport(e.to_string()))?;
            tracing::trace!(status, bytes = body.len(), "HTTP response received");
            Ok::<_, RequestError>(Response::new(status, body.to_vec()))
        });

        let abort = task.abort_handle();
        ctx.register_aborter(move || abort.abort());

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(RequestError::Aborted),
                Err(e) => Err(RequestError::Transport(e.to_string())),
            }
        }
        .boxed()
    }
}
