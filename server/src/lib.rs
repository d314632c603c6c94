//! Language server lifecycle on top of `lspkit-jsonrpc`.
//!
//! Build a [`Server`] with [`ServerBuilder`], registering typed handlers per
//! LSP feature, then [`Server::serve`] it over any byte stream. The handshake,
//! shutdown, and exit routes are owned by the server and gate every other
//! route on the session state.

pub mod capabilities;
pub mod client;
pub mod config;
pub mod context;
pub mod lifecycle;

mod builder;
mod server;

pub use builder::ServerBuilder;
pub use capabilities::{Feature, Features, detect_capabilities, merge_capabilities};
pub use client::{Client, ClientError, NotificationParamsOf, ParamsOf, ResultOf};
pub use config::{ConfigError, DocumentSync, ServerConfig};
pub use context::{NotificationContext, RequestContext};
pub use lifecycle::LifecycleState;
pub use server::{ServeError, Server, SessionEnd};

pub use lsp_types;
pub use lspkit_jsonrpc as jsonrpc;
