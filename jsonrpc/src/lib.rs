//! Content-Length framed JSON-RPC 2.0 transport and dispatch.

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod id;
pub mod message;

pub use codec::{FrameError, FrameReader, FrameWriter, MAX_HEADER_BYTES, ReadError, WriteError};
pub use connection::{
    CANCEL_REQUEST_METHOD, CallError, Connection, ConnectionError, ConnectionOptions,
};
pub use dispatcher::{
    Dispatcher, Gate, MethodHandler, NotificationContext, NotificationHandler, RequestContext,
    decode_params, to_response_error, typed_method, typed_notification,
};
pub use error::{ErrorCode, ResponseError};
pub use id::RequestId;
pub use message::{DecodeError, DecodeErrorKind, Message, Notification, Request, Response};

pub use tokio_util::sync::CancellationToken;
