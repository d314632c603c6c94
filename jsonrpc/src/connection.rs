//! Bidirectional JSON-RPC peer over a byte stream.
//!
//! One [`Connection`] owns both halves of the transport. [`Connection::serve`]
//! runs the read loop: inbound requests are handled concurrently, inbound
//! notifications in arrival order, and inbound responses are matched to
//! outbound [`Connection::call`]s. Writes from any task are serialized so each
//! frame goes out whole.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio_util::sync::CancellationToken;

use crate::codec::{
    DEFAULT_MAX_FRAME_BYTES, FrameError, FrameReader, FrameWriter, ReadError, WriteError,
};
use crate::dispatcher::{Dispatcher, NotificationContext, RequestContext};
use crate::error::ResponseError;
use crate::id::RequestId;
use crate::message::{DecodeError, Message, Notification, Request, Response};

/// Peer-sent notification asking us to abandon an in-flight request.
pub const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    max_frame_bytes: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

/// Why [`Connection::serve`] stopped.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection is already being served")]
    AlreadyServing,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("undecodable message: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("call cancelled before a response arrived")]
    Cancelled,
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    reader: Mutex<Option<FrameReader<BoxReader>>>,
    writer: AsyncMutex<FrameWriter<BoxWriter>>,
    next_id: AtomicI64,
    next_seq: AtomicU64,
    pending: Mutex<PendingCalls>,
    in_flight: Mutex<HashMap<RequestId, InFlight>>,
}

#[derive(Default)]
struct PendingCalls {
    closed: bool,
    waiters: HashMap<RequestId, oneshot::Sender<Response>>,
}

struct InFlight {
    seq: u64,
    token: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    pub fn new<R, W>(reader: R, writer: W, options: ConnectionOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxReader = Box::new(reader);
        let writer: BoxWriter = Box::new(writer);
        Self {
            shared: Arc::new(Shared {
                reader: Mutex::new(Some(
                    FrameReader::new(reader).with_max_frame_bytes(options.max_frame_bytes),
                )),
                writer: AsyncMutex::new(FrameWriter::new(writer)),
                next_id: AtomicI64::new(0),
                next_seq: AtomicU64::new(0),
                pending: Mutex::new(PendingCalls::default()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Run the read loop until `shutdown` fires, the peer closes the stream,
    /// or the stream desynchronizes.
    ///
    /// On return every in-flight handler's token is cancelled and every
    /// outstanding [`call`](Self::call) fails with
    /// [`CallError::ConnectionClosed`].
    pub async fn serve(
        &self,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), ConnectionError> {
        let mut reader = lock(&self.shared.reader)
            .take()
            .ok_or(ConnectionError::AlreadyServing)?;

        let session = shutdown.child_token();
        let _cancel_handlers = session.clone().drop_guard();
        let dispatcher = Arc::new(dispatcher);

        let result = self.read_loop(&mut reader, &dispatcher, &session).await;
        self.close_pending();
        result
    }

    async fn read_loop(
        &self,
        reader: &mut FrameReader<BoxReader>,
        dispatcher: &Arc<Dispatcher>,
        session: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        loop {
            let next = tokio::select! {
                biased;
                () = session.cancelled() => {
                    tracing::debug!("Connection shut down");
                    return Ok(());
                }
                next = reader.read_message() => next,
            };

            match next {
                Ok(Some(Message::Request(request))) => {
                    self.spawn_request(request, dispatcher, session);
                }
                Ok(Some(Message::Notification(notification))) => {
                    self.handle_notification(notification, dispatcher).await;
                }
                Ok(Some(Message::Response(response))) => self.route_response(response),
                Ok(None) => {
                    tracing::debug!("Peer closed the stream");
                    return Ok(());
                }
                Err(ReadError::Decode(err)) => {
                    let Some(id) = err.id().cloned() else {
                        tracing::error!("Undecodable message: {err}");
                        return Err(err.into());
                    };
                    tracing::warn!("Malformed request {id}: {err}");
                    self.write_response(Response::error(
                        id,
                        ResponseError::parse_error(err.to_string()),
                    ))
                    .await;
                }
                Err(ReadError::Frame(err)) => {
                    tracing::error!("Framing error: {err}");
                    return Err(err.into());
                }
            }
        }
    }

    fn spawn_request(
        &self,
        request: Request,
        dispatcher: &Arc<Dispatcher>,
        session: &CancellationToken,
    ) {
        let token = session.child_token();
        let tracked = self.track_in_flight(request.id.clone(), token.clone());
        let cx = RequestContext::new(request.id.clone(), token, self.clone());
        let dispatcher = Arc::clone(dispatcher);
        let connection = self.clone();

        tokio::spawn(async move {
            let response = dispatcher.handle_request(request, cx).await;
            // Deregister before the peer can observe the response and reuse
            // the ID.
            drop(tracked);
            connection.write_response(response).await;
        });
    }

    fn track_in_flight(&self, id: RequestId, token: CancellationToken) -> InFlightGuard {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let previous = lock(&self.shared.in_flight).insert(id.clone(), InFlight { seq, token });
        if previous.is_some() {
            tracing::warn!("Peer reused in-flight request ID {id}");
        }
        InFlightGuard {
            shared: Arc::clone(&self.shared),
            id,
            seq,
        }
    }

    async fn handle_notification(&self, notification: Notification, dispatcher: &Dispatcher) {
        if notification.method == CANCEL_REQUEST_METHOD {
            self.cancel_in_flight(notification.params);
            return;
        }
        dispatcher
            .handle_notification(notification, NotificationContext::new(self.clone()))
            .await;
    }

    fn cancel_in_flight(&self, params: Option<Value>) {
        #[derive(Deserialize)]
        struct CancelParams {
            id: RequestId,
        }

        let params: CancelParams = match serde_json::from_value(params.unwrap_or(Value::Null)) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!("Ignoring malformed {CANCEL_REQUEST_METHOD}: {e}");
                return;
            }
        };

        match lock(&self.shared.in_flight).get(&params.id) {
            Some(entry) => {
                tracing::debug!("Cancelling request {}", params.id);
                entry.token.cancel();
            }
            None => tracing::trace!("Cancel for request {} that is not in flight", params.id),
        }
    }

    fn route_response(&self, response: Response) {
        let waiter = lock(&self.shared.pending).waiters.remove(&response.id);
        match waiter {
            Some(tx) => {
                if let Err(response) = tx.send(response) {
                    tracing::debug!("Caller for {} went away before its response", response.id);
                }
            }
            None => tracing::debug!("Discarding response {} with no pending call", response.id),
        }
    }

    fn close_pending(&self) {
        let mut pending = lock(&self.shared.pending);
        pending.closed = true;
        // Dropping the senders wakes every waiting caller.
        pending.waiters.clear();
    }

    async fn send(&self, msg: &Message) -> Result<(), WriteError> {
        let body = msg.encode()?;
        let mut writer = self.shared.writer.lock().await;
        writer.write_frame(&body).await?;
        Ok(())
    }

    async fn write_response(&self, response: Response) {
        let id = response.id.clone();
        if let Err(e) = self.answer(response).await {
            tracing::warn!("Failed to write response for request {id}: {e}");
        }
    }

    /// Write a response frame directly.
    pub async fn answer(&self, response: Response) -> Result<(), WriteError> {
        self.send(&Message::Response(response)).await
    }

    /// Send a request to the peer and wait for its response.
    ///
    /// When `cancel` fires first the pending slot is released and
    /// [`CallError::Cancelled`] is returned; a response arriving afterwards is
    /// discarded. Dropping the returned future has the same cleanup effect.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Response, CallError> {
        let id = RequestId::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.shared.pending);
            if pending.closed {
                return Err(CallError::ConnectionClosed);
            }
            pending.waiters.insert(id.clone(), tx);
        }
        let _slot = PendingGuard {
            shared: Arc::clone(&self.shared),
            id: id.clone(),
        };

        tracing::trace!("Calling {method} as request {id}");
        self.send(&Message::Request(Request::new(id, method, params)))
            .await?;

        tokio::select! {
            biased;
            response = rx => response.map_err(|_| CallError::ConnectionClosed),
            () = cancel.cancelled() => Err(CallError::Cancelled),
        }
    }

    /// Fire-and-forget notification to the peer.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), WriteError> {
        self.send(&Message::Notification(Notification::new(method, params)))
            .await
    }

    /// Outbound calls still waiting on a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        lock(&self.shared.pending).waiters.len()
    }

    /// Inbound requests whose handlers have not finished.
    #[must_use]
    pub fn in_flight_requests(&self) -> usize {
        lock(&self.shared.in_flight).len()
    }

    #[must_use]
    pub fn is_handling(&self, id: &RequestId) -> bool {
        lock(&self.shared.in_flight).contains_key(id)
    }
}

/// Removes an in-flight entry when its handler finishes, unless a newer
/// request has since claimed the same ID.
struct InFlightGuard {
    shared: Arc<Shared>,
    id: RequestId,
    seq: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.shared.in_flight);
        let current = in_flight.get(&self.id).is_some_and(|e| e.seq == self.seq);
        if current {
            in_flight.remove(&self.id);
        }
    }
}

struct PendingGuard {
    shared: Arc<Shared>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.shared.pending).waiters.remove(&self.id);
    }
}
