//! Session orchestration: the handshake, shutdown, and exit routes.

use std::mem;
use std::sync::Arc;

use anyhow::Context as _;
use lsp_types::notification::{Exit, Notification as _};
use lsp_types::request::{Initialize, Request as _, Shutdown};
use lsp_types::{InitializeParams, InitializeResult, ServerInfo};
use lspkit_jsonrpc::{
    self as rpc, CancellationToken, Connection, ConnectionError, ConnectionOptions, Dispatcher,
    decode_params,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::builder::{InitializeHook, ServerBuilder, ShutdownHook};
use crate::capabilities::{Features, advertise_unmodelled, detect_capabilities, merge_capabilities};
use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::lifecycle::{HandshakeGuard, Lifecycle, LifecycleState};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `exit`.
    Exited { after_shutdown: bool },
    /// The stream closed, or serving was stopped, without an `exit`.
    Disconnected,
}

impl SessionEnd {
    /// Process exit code: 0 after an orderly shutdown/exit, 1 otherwise.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited {
                after_shutdown: true,
            } => 0,
            Self::Exited {
                after_shutdown: false,
            }
            | Self::Disconnected => 1,
        }
    }
}

pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    lifecycle: Arc<Lifecycle>,
    stop: CancellationToken,
}

struct Handshake {
    lifecycle: Arc<Lifecycle>,
    features: Features,
    config: ServerConfig,
    hook: Option<InitializeHook>,
}

impl Handshake {
    async fn run(&self, params: Option<Value>, cx: rpc::RequestContext) -> anyhow::Result<Value> {
        let guard = HandshakeGuard::begin(&self.lifecycle)?;
        let params: InitializeParams = decode_params(params)?;

        let result = match &self.hook {
            Some(hook) => hook(params, RequestContext::from_rpc(cx)).await?,
            None => InitializeResult::default(),
        };
        let result = self.complete(result);
        let mut value =
            serde_json::to_value(&result).context("failed to serialize initialize result")?;
        if let Some(capabilities) = value.get_mut("capabilities") {
            advertise_unmodelled(&self.features, capabilities);
        }

        guard.commit();
        tracing::info!("Initialized {}", self.config.name());
        Ok(value)
    }

    /// Merge detected capabilities under the hook's result and fill in
    /// `serverInfo` when the hook left it out.
    fn complete(&self, mut result: InitializeResult) -> InitializeResult {
        let detected = detect_capabilities(&self.features, self.config.document_sync().kind());
        result.capabilities = merge_capabilities(mem::take(&mut result.capabilities), detected);
        if result.server_info.is_none() {
            result.server_info = Some(ServerInfo {
                name: self.config.name().to_string(),
                version: self.config.version().map(str::to_string),
            });
        }
        result
    }
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub(crate) fn assemble(
        config: ServerConfig,
        mut dispatcher: Dispatcher,
        features: Features,
        on_initialize: Option<InitializeHook>,
        on_shutdown: Option<ShutdownHook>,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::default());
        let stop = CancellationToken::new();

        let handshake = Arc::new(Handshake {
            lifecycle: Arc::clone(&lifecycle),
            features,
            config: config.clone(),
            hook: on_initialize,
        });
        dispatcher.register_method(Initialize::METHOD, move |params, cx| {
            let handshake = Arc::clone(&handshake);
            async move { handshake.run(params, cx).await }
        });

        let shutting_down = Arc::clone(&lifecycle);
        dispatcher.register_method(Shutdown::METHOD, move |_params, cx| {
            let lifecycle = Arc::clone(&shutting_down);
            let hook = on_shutdown.clone();
            async move {
                if let Some(hook) = hook {
                    if let Err(e) = hook(RequestContext::from_rpc(cx)).await {
                        tracing::warn!("Shutdown hook failed: {e:#}");
                    }
                }
                lifecycle.begin_shutdown();
                tracing::info!("Shutdown requested");
                Ok(Value::Null)
            }
        });

        let exiting = Arc::clone(&lifecycle);
        let exit = stop.clone();
        dispatcher.register_notification(Exit::METHOD, move |_params, _cx| {
            exiting.exit();
            exit.cancel();
            async { Ok(()) }
        });

        dispatcher.set_gate(Arc::clone(&lifecycle) as Arc<dyn rpc::Gate>);

        Self {
            config,
            dispatcher,
            lifecycle,
            stop,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Cancelling this token ends [`serve`](Self::serve) as
    /// [`SessionEnd::Disconnected`].
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Serve one session over the given stream halves.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<SessionEnd, ServeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let options =
            ConnectionOptions::default().with_max_frame_bytes(self.config.max_frame_bytes());
        let connection = Connection::new(reader, writer, options);
        tracing::info!("Serving {}", self.config.name());

        connection.serve(self.dispatcher, self.stop.clone()).await?;

        let end = if self.lifecycle.state() == LifecycleState::Exited {
            SessionEnd::Exited {
                after_shutdown: self.lifecycle.exited_after_shutdown(),
            }
        } else {
            SessionEnd::Disconnected
        };
        tracing::info!(?end, "Session ended");
        Ok(end)
    }
}
