//! Handler registration.
//!
//! Each feature method installs a typed route and records the matching
//! [`Feature`], so the advertised capabilities always agree with the routes
//! that actually exist.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use lsp_types::notification::{self, Notification};
use lsp_types::request::{self, Request};
use lsp_types::{InitializeParams, InitializeResult};
use lspkit_jsonrpc::{self as rpc, Dispatcher, typed_method, typed_notification};
use serde_json::Value;

use crate::capabilities::{Feature, Features};
use crate::client::{NotificationParamsOf, ParamsOf, ResultOf};
use crate::config::ServerConfig;
use crate::context::{NotificationContext, RequestContext};
use crate::server::Server;

pub(crate) type InitializeHook = Arc<
    dyn Fn(InitializeParams, RequestContext) -> BoxFuture<'static, anyhow::Result<InitializeResult>>
        + Send
        + Sync,
>;

pub(crate) type ShutdownHook =
    Arc<dyn Fn(RequestContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

macro_rules! typed_requests {
    ($($(#[$doc:meta])* $name:ident => $req:ty;)+) => {$(
        $(#[$doc])*
        pub fn $name<F, Fut>(self, handler: F) -> Self
        where
            F: Fn(ParamsOf<$req>, RequestContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<ResultOf<$req>>> + Send + 'static,
        {
            self.request::<$req, F, Fut>(handler)
        }
    )+};
}

macro_rules! typed_notifications {
    ($($(#[$doc:meta])* $name:ident => $notif:ty;)+) => {$(
        $(#[$doc])*
        pub fn $name<F, Fut>(self, handler: F) -> Self
        where
            F: Fn(NotificationParamsOf<$notif>, NotificationContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        {
            self.notification::<$notif, F, Fut>(handler)
        }
    )+};
}

pub struct ServerBuilder {
    config: ServerConfig,
    dispatcher: Dispatcher,
    features: Features,
    on_initialize: Option<InitializeHook>,
    on_shutdown: Option<ShutdownHook>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: Dispatcher::new(),
            features: Features::new(),
            on_initialize: None,
            on_shutdown: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Features recorded so far.
    #[must_use]
    pub fn features(&self) -> &Features {
        &self.features
    }

    fn record(&mut self, method: &str) {
        if let Some(feature) = Feature::for_method(method) {
            self.features.insert(feature);
        }
    }

    /// Route any `lsp_types` request. Requests tied to a capability record
    /// their [`Feature`]; anything else must be advertised from the
    /// initialize hook if the client needs to know.
    ///
    /// `initialize` and `shutdown` are owned by the server and cannot be
    /// overridden here; use [`on_initialize`](Self::on_initialize) and
    /// [`on_shutdown`](Self::on_shutdown).
    pub fn request<R, F, Fut>(mut self, handler: F) -> Self
    where
        R: Request,
        F: Fn(R::Params, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R::Result>> + Send + 'static,
    {
        self.record(R::METHOD);
        self.dispatcher.insert_method(
            R::METHOD,
            typed_method(move |params: R::Params, cx: rpc::RequestContext| {
                handler(params, RequestContext::from_rpc(cx))
            }),
        );
        self
    }

    pub fn notification<N, F, Fut>(mut self, handler: F) -> Self
    where
        N: Notification,
        F: Fn(N::Params, NotificationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.record(N::METHOD);
        self.dispatcher.insert_notification(
            N::METHOD,
            typed_notification(move |params: N::Params, cx: rpc::NotificationContext| {
                handler(params, NotificationContext::from_rpc(cx))
            }),
        );
        self
    }

    /// Route an arbitrary method over raw JSON params.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.dispatcher.register_method(name, move |params, cx| {
            handler(params, RequestContext::from_rpc(cx))
        });
        self
    }

    pub fn raw_notification<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>, NotificationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.register_notification(name, move |params, cx| {
            handler(params, NotificationContext::from_rpc(cx))
        });
        self
    }

    /// Application handshake logic. Whatever capabilities the returned result
    /// leaves unset are filled in from the registered features.
    pub fn on_initialize<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(InitializeParams, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<InitializeResult>> + Send + 'static,
    {
        self.on_initialize = Some(Arc::new(move |params, cx| hook(params, cx).boxed()));
        self
    }

    pub fn on_initialized<F, Fut>(self, hook: F) -> Self
    where
        F: Fn(lsp_types::InitializedParams, NotificationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notification::<notification::Initialized, F, Fut>(hook)
    }

    /// Runs before the server enters the shutting-down state. A failing hook is
    /// logged; the shutdown still completes.
    pub fn on_shutdown<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_shutdown = Some(Arc::new(move |cx| hook(cx).boxed()));
        self
    }

    typed_requests! {
        hover => request::HoverRequest;
        completion => request::Completion;
        completion_resolve => request::ResolveCompletionItem;
        signature_help => request::SignatureHelpRequest;
        declaration => request::GotoDeclaration;
        definition => request::GotoDefinition;
        type_definition => request::GotoTypeDefinition;
        implementation => request::GotoImplementation;
        references => request::References;
        document_highlight => request::DocumentHighlightRequest;
        document_symbol => request::DocumentSymbolRequest;
        workspace_symbol => request::WorkspaceSymbolRequest;
        code_action => request::CodeActionRequest;
        code_action_resolve => request::CodeActionResolveRequest;
        code_lens => request::CodeLensRequest;
        code_lens_resolve => request::CodeLensResolve;
        document_link => request::DocumentLinkRequest;
        document_link_resolve => request::DocumentLinkResolve;
        document_color => request::DocumentColor;
        formatting => request::Formatting;
        range_formatting => request::RangeFormatting;
        rename => request::Rename;
        prepare_rename => request::PrepareRenameRequest;
        folding_range => request::FoldingRangeRequest;
        selection_range => request::SelectionRangeRequest;
        linked_editing_range => request::LinkedEditingRange;
        call_hierarchy_prepare => request::CallHierarchyPrepare;
        moniker => request::MonikerRequest;
        inlay_hint => request::InlayHintRequest;
        inlay_hint_resolve => request::InlayHintResolveRequest;
        inline_value => request::InlineValueRequest;
        document_diagnostic => request::DocumentDiagnosticRequest;
        workspace_diagnostic => request::WorkspaceDiagnosticRequest;
        /// Only advertised together with a document sync route.
        will_save_wait_until => request::WillSaveWaitUntil;
        /// Advertised with a filter matching every file.
        will_create_files => request::WillCreateFiles;
        will_rename_files => request::WillRenameFiles;
        will_delete_files => request::WillDeleteFiles;
        type_hierarchy_prepare => request::TypeHierarchyPrepare;
        type_hierarchy_supertypes => request::TypeHierarchySupertypes;
        type_hierarchy_subtypes => request::TypeHierarchySubtypes;
        /// Advertised with an empty legend; set `semantic_tokens_provider`
        /// from the initialize hook to publish real token types.
        semantic_tokens_full => request::SemanticTokensFullRequest;
        /// Only advertised together with `semantic_tokens_full`.
        semantic_tokens_full_delta => request::SemanticTokensFullDeltaRequest;
        semantic_tokens_range => request::SemanticTokensRangeRequest;
        /// Advertise the command list from the initialize hook.
        execute_command => request::ExecuteCommand;
        /// Advertise the trigger characters from the initialize hook.
        on_type_formatting => request::OnTypeFormatting;
        color_presentation => request::ColorPresentationRequest;
        call_hierarchy_incoming => request::CallHierarchyIncomingCalls;
        call_hierarchy_outgoing => request::CallHierarchyOutgoingCalls;
    }

    typed_notifications! {
        did_open => notification::DidOpenTextDocument;
        did_change => notification::DidChangeTextDocument;
        did_close => notification::DidCloseTextDocument;
        did_save => notification::DidSaveTextDocument;
        will_save => notification::WillSaveTextDocument;
        did_change_configuration => notification::DidChangeConfiguration;
        did_change_watched_files => notification::DidChangeWatchedFiles;
        did_change_workspace_folders => notification::DidChangeWorkspaceFolders;
        set_trace => notification::SetTrace;
    }

    #[must_use]
    pub fn build(self) -> Server {
        Server::assemble(
            self.config,
            self.dispatcher,
            self.features,
            self.on_initialize,
            self.on_shutdown,
        )
    }
}
