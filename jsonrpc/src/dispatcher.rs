//! Method routing table.
//!
//! Handlers are type-erased closures over the raw `params` value. The
//! [`typed_method`] and [`typed_notification`] adapters lift strongly typed
//! handlers into that shape.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context as _;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::ResponseError;
use crate::id::RequestId;
use crate::message::{Notification, Request, Response};

pub type MethodHandler = Arc<
    dyn Fn(Option<Value>, RequestContext) -> BoxFuture<'static, anyhow::Result<Value>>
        + Send
        + Sync,
>;

pub type NotificationHandler = Arc<
    dyn Fn(Option<Value>, NotificationContext) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Admission check consulted before any routing.
pub trait Gate: Send + Sync {
    /// `Err` becomes the response for the request; the handler never runs.
    fn admit_request(&self, method: &str) -> Result<(), ResponseError>;

    /// `false` drops the notification silently.
    fn admit_notification(&self, method: &str) -> bool;
}

/// Everything a request handler gets besides its params.
#[derive(Clone)]
pub struct RequestContext {
    id: RequestId,
    token: CancellationToken,
    connection: Connection,
}

impl RequestContext {
    pub fn new(id: RequestId, token: CancellationToken, connection: Connection) -> Self {
        Self {
            id,
            token,
            connection,
        }
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Cancelled when the peer sends `$/cancelRequest` for this request or
    /// the connection stops serving.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[derive(Clone)]
pub struct NotificationContext {
    connection: Connection,
}

impl NotificationContext {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    methods: HashMap<String, MethodHandler>,
    notifications: HashMap<String, NotificationHandler>,
    gate: Option<Arc<dyn Gate>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler over raw params. Replaces any existing
    /// handler for `method`.
    pub fn register_method<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |params, cx| handler(params, cx).boxed());
        self.insert_method(method, handler);
    }

    pub fn register_notification<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>, NotificationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: NotificationHandler =
            Arc::new(move |params, cx| handler(params, cx).boxed());
        self.insert_notification(method, handler);
    }

    pub fn insert_method(&mut self, method: impl Into<String>, handler: MethodHandler) {
        self.methods.insert(method.into(), handler);
    }

    pub fn insert_notification(&mut self, method: impl Into<String>, handler: NotificationHandler) {
        self.notifications.insert(method.into(), handler);
    }

    pub fn set_gate(&mut self, gate: Arc<dyn Gate>) {
        self.gate = Some(gate);
    }

    /// Route a request to its handler. Always produces a response.
    pub async fn handle_request(&self, request: Request, cx: RequestContext) -> Response {
        let Request { id, method, params } = request;

        if let Some(gate) = &self.gate {
            if let Err(err) = gate.admit_request(&method) {
                tracing::debug!(method = %method, code = err.code, "request rejected by gate");
                return Response::error(id, err);
            }
        }

        let Some(handler) = self.methods.get(&method).cloned() else {
            tracing::debug!("No handler for request '{method}'");
            return Response::error(id, ResponseError::method_not_found(&method));
        };

        let outcome = AssertUnwindSafe(async move { handler(params, cx).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => Response::ok(id, result),
            Ok(Err(err)) => Response::error(id, to_response_error(&err)),
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                tracing::warn!("Handler for '{method}' panicked: {detail}");
                Response::error(
                    id,
                    ResponseError::internal_error(format!(
                        "handler for {method} panicked: {detail}"
                    )),
                )
            }
        }
    }

    /// Route a notification. Unknown methods are ignored, and handler
    /// failures are logged rather than reported.
    pub async fn handle_notification(&self, notification: Notification, cx: NotificationContext) {
        let Notification { method, params } = notification;

        if let Some(gate) = &self.gate {
            if !gate.admit_notification(&method) {
                tracing::debug!(method = %method, "notification dropped by gate");
                return;
            }
        }

        let Some(handler) = self.notifications.get(&method).cloned() else {
            tracing::trace!("Ignoring notification: {method}");
            return;
        };

        let outcome = AssertUnwindSafe(async move { handler(params, cx).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("Notification handler for '{method}' failed: {err:#}"),
            Err(panic) => tracing::warn!(
                "Notification handler for '{method}' panicked: {}",
                panic_message(panic.as_ref())
            ),
        }
    }
}

/// Map a handler error onto the wire. A [`ResponseError`] anywhere in the
/// chain is used verbatim; anything else becomes an internal error.
#[must_use]
pub fn to_response_error(err: &anyhow::Error) -> ResponseError {
    match err.downcast_ref::<ResponseError>() {
        Some(response_error) => response_error.clone(),
        None => ResponseError::internal_error(format!("{err:#}")),
    }
}

/// Deserialize raw params into `P`. A missing `params` member decodes as
/// `null`, which suits `()` and `Option<_>` payloads.
pub fn decode_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, ResponseError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ResponseError::invalid_params(format!("invalid params: {e}")))
}

/// Adapt a typed request handler to a [`MethodHandler`].
pub fn typed_method<P, R, F, Fut>(handler: F) -> MethodHandler
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    Arc::new(move |params, cx| {
        let call = decode_params::<P>(params).map(|params| handler(params, cx));
        async move {
            let result = call?.await?;
            serde_json::to_value(result).context("failed to serialize result")
        }
        .boxed()
    })
}

/// Adapt a typed notification handler to a [`NotificationHandler`].
pub fn typed_notification<P, F, Fut>(handler: F) -> NotificationHandler
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P, NotificationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |params, cx| {
        let call = decode_params::<P>(params).map(|params| handler(params, cx));
        async move { call?.await }.boxed()
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic payload")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::connection::{Connection, ConnectionOptions};
    use crate::error::ErrorCode;

    fn detached_connection() -> Connection {
        Connection::new(
            tokio::io::empty(),
            tokio::io::sink(),
            ConnectionOptions::default(),
        )
    }

    fn context(id: i64) -> RequestContext {
        RequestContext::new(
            RequestId::Number(id),
            CancellationToken::new(),
            detached_connection(),
        )
    }

    fn request(method: &str, params: Option<Value>) -> Request {
        Request::new(1, method, params)
    }

    #[derive(serde::Deserialize)]
    struct AddParams {
        a: i64,
        b: i64,
    }

    fn adder() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.insert_method(
            "add",
            typed_method(|p: AddParams, _cx| async move { Ok(p.a + p.b) }),
        );
        dispatcher
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let dispatcher = Dispatcher::new();
        let response = dispatcher
            .handle_request(request("nope/missing", None), context(1))
            .await;
        let err = response.error_object().unwrap();
        assert_eq!(err.error_code(), ErrorCode::MethodNotFound);
        assert!(err.message.contains("nope/missing"));
    }

    #[tokio::test]
    async fn test_typed_success_is_wrapped() {
        let response = adder()
            .handle_request(request("add", Some(json!({"a": 2, "b": 3}))), context(1))
            .await;
        assert_eq!(response.result, Ok(json!(5)));
        assert_eq!(response.id, RequestId::Number(1));
    }

    #[tokio::test]
    async fn test_bad_params_are_invalid_params() {
        let response = adder()
            .handle_request(request("add", Some(json!({"a": "two"}))), context(1))
            .await;
        assert_eq!(
            response.error_object().unwrap().error_code(),
            ErrorCode::InvalidParams
        );
    }

    #[tokio::test]
    async fn test_response_error_passes_through_verbatim() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_method("stale", |_params, _cx| async {
            Err(anyhow::Error::new(ResponseError::content_modified("document changed"))
                .context("computing hover"))
        });
        let response = dispatcher
            .handle_request(request("stale", None), context(1))
            .await;
        let err = response.error_object().unwrap();
        assert_eq!(err.code, -32801);
        assert_eq!(err.message, "document changed");
    }

    #[tokio::test]
    async fn test_plain_error_becomes_internal_error() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_method("boom", |_params, _cx| async {
            Err(anyhow::anyhow!("disk on fire"))
        });
        let response = dispatcher
            .handle_request(request("boom", None), context(1))
            .await;
        let err = response.error_object().unwrap();
        assert_eq!(err.error_code(), ErrorCode::InternalError);
        assert_eq!(err.message, "disk on fire");
    }

    #[tokio::test]
    async fn test_unserializable_result_is_internal_error() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.insert_method(
            "tuple-keys",
            typed_method(|(): (), _cx| async {
                let mut map = BTreeMap::new();
                map.insert((1, 2), "x");
                Ok(map)
            }),
        );
        let response = dispatcher
            .handle_request(request("tuple-keys", None), context(1))
            .await;
        let err = response.error_object().unwrap();
        assert_eq!(err.error_code(), ErrorCode::InternalError);
        assert!(err.message.starts_with("failed to serialize result"));
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_internal_error() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_method("panic", |params: Option<Value>, _cx| async move {
            if params.is_none() {
                panic!("handler bug");
            }
            Ok(Value::Null)
        });
        let response = dispatcher
            .handle_request(request("panic", None), context(1))
            .await;
        let err = response.error_object().unwrap();
        assert_eq!(err.error_code(), ErrorCode::InternalError);
        assert!(err.message.contains("handler bug"));
    }

    struct DenyAll;

    impl Gate for DenyAll {
        fn admit_request(&self, _method: &str) -> Result<(), ResponseError> {
            Err(ResponseError::server_not_initialized())
        }

        fn admit_notification(&self, _method: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_gate_runs_before_routing() {
        let mut dispatcher = adder();
        dispatcher.set_gate(Arc::new(DenyAll));

        let known = dispatcher
            .handle_request(request("add", Some(json!({"a": 1, "b": 1}))), context(1))
            .await;
        let unknown = dispatcher
            .handle_request(request("other", None), context(2))
            .await;
        assert_eq!(known.error_object().unwrap().code, -32002);
        assert_eq!(unknown.error_object().unwrap().code, -32002);
    }

    #[tokio::test]
    async fn test_notifications_route_and_failures_are_swallowed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        let sink = Arc::clone(&seen);
        dispatcher.insert_notification(
            "note",
            typed_notification(move |n: i64, _cx| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(n);
                    Ok(())
                }
            }),
        );
        dispatcher.register_notification("fails", |_params, _cx| async {
            Err(anyhow::anyhow!("ignored"))
        });

        let cx = NotificationContext::new(detached_connection());
        dispatcher
            .handle_notification(Notification::new("note", Some(json!(4))), cx.clone())
            .await;
        dispatcher
            .handle_notification(Notification::new("fails", None), cx.clone())
            .await;
        dispatcher
            .handle_notification(Notification::new("unknown", None), cx.clone())
            .await;
        // Undecodable params never reach the handler.
        dispatcher
            .handle_notification(Notification::new("note", Some(json!("x"))), cx)
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_gate_drops_notifications() {
        let seen = Arc::new(Mutex::new(0));
        let mut dispatcher = Dispatcher::new();
        let counter = Arc::clone(&seen);
        dispatcher.register_notification("note", move |_params, _cx| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock().unwrap() += 1;
                Ok(())
            }
        });
        dispatcher.set_gate(Arc::new(DenyAll));

        dispatcher
            .handle_notification(
                Notification::new("note", None),
                NotificationContext::new(detached_connection()),
            )
            .await;
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
