//! Per-call contexts handed to server handlers.

use lspkit_jsonrpc::{self as rpc, CancellationToken, RequestId};

use crate::client::Client;

#[derive(Clone)]
pub struct RequestContext {
    id: RequestId,
    token: CancellationToken,
    client: Client,
}

impl RequestContext {
    pub(crate) fn from_rpc(cx: rpc::RequestContext) -> Self {
        Self {
            client: Client::new(cx.connection().clone()),
            id: cx.id().clone(),
            token: cx.token().clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Fires when the client cancels this request or the session ends.
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
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[derive(Clone)]
pub struct NotificationContext {
    client: Client,
}

impl NotificationContext {
    pub(crate) fn from_rpc(cx: rpc::NotificationContext) -> Self {
        Self {
            client: Client::new(cx.connection().clone()),
        }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}
