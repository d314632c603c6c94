//! Calls from the server to the editor.

use lsp_types::notification::{
    LogMessage, LogTrace, Notification, Progress, PublishDiagnostics, ShowMessage, TelemetryEvent,
};
use lsp_types::request::{
    ApplyWorkspaceEdit, CodeLensRefresh, InlayHintRefreshRequest, InlineValueRefreshRequest,
    RegisterCapability, Request, SemanticTokensRefresh, ShowDocument, ShowMessageRequest,
    UnregisterCapability, WorkDoneProgressCreate, WorkspaceConfiguration,
    WorkspaceDiagnosticRefresh,
};
use lsp_types::{
    ApplyWorkspaceEditParams, ConfigurationItem, ConfigurationParams, Diagnostic,
    LogMessageParams, MessageType, ProgressToken, PublishDiagnosticsParams, Registration,
    RegistrationParams, ShowMessageParams, Unregistration, UnregistrationParams, Uri,
    WorkDoneProgressCreateParams, WorkspaceEdit,
};
use lspkit_jsonrpc::{CallError, CancellationToken, Connection, ResponseError, WriteError};
use serde::Serialize;
use serde_json::Value;

pub type ParamsOf<R> = <R as Request>::Params;
pub type ResultOf<R> = <R as Request>::Result;
pub type NotificationParamsOf<N> = <N as Notification>::Params;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("failed to serialize params: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to decode client result: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("client responded with an error: {0}")]
    Response(ResponseError),
}

/// Handle for talking to the connected editor. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    connection: Connection,
}

impl Client {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send any request and decode its result.
    ///
    /// Params that serialize to `null` are omitted from the wire.
    pub async fn send_request<R: Request>(
        &self,
        params: R::Params,
        cancel: &CancellationToken,
    ) -> Result<R::Result, ClientError> {
        let params = encode_params(&params)?;
        let response = self.connection.call(R::METHOD, params, cancel).await?;
        let value = response.result.map_err(ClientError::Response)?;
        serde_json::from_value(value).map_err(ClientError::Deserialize)
    }

    pub async fn send_notification<N: Notification>(
        &self,
        params: N::Params,
    ) -> Result<(), ClientError> {
        let params = encode_params(&params)?;
        self.connection.notify(N::METHOD, params).await?;
        Ok(())
    }

    pub async fn publish_diagnostics(
        &self,
        uri: Uri,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    ) -> Result<(), ClientError> {
        self.send_notification::<PublishDiagnostics>(PublishDiagnosticsParams::new(
            uri,
            diagnostics,
            version,
        ))
        .await
    }

    pub async fn show_message(
        &self,
        typ: MessageType,
        message: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send_notification::<ShowMessage>(ShowMessageParams {
            typ,
            message: message.into(),
        })
        .await
    }

    pub async fn log_message(
        &self,
        typ: MessageType,
        message: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send_notification::<LogMessage>(LogMessageParams {
            typ,
            message: message.into(),
        })
        .await
    }

    pub async fn progress(
        &self,
        params: NotificationParamsOf<Progress>,
    ) -> Result<(), ClientError> {
        self.send_notification::<Progress>(params).await
    }

    pub async fn telemetry_event(
        &self,
        params: NotificationParamsOf<TelemetryEvent>,
    ) -> Result<(), ClientError> {
        self.send_notification::<TelemetryEvent>(params).await
    }

    pub async fn log_trace(
        &self,
        params: NotificationParamsOf<LogTrace>,
    ) -> Result<(), ClientError> {
        self.send_notification::<LogTrace>(params).await
    }

    pub async fn show_message_request(
        &self,
        params: ParamsOf<ShowMessageRequest>,
        cancel: &CancellationToken,
    ) -> Result<ResultOf<ShowMessageRequest>, ClientError> {
        self.send_request::<ShowMessageRequest>(params, cancel)
            .await
    }

    pub async fn show_document(
        &self,
        params: ParamsOf<ShowDocument>,
        cancel: &CancellationToken,
    ) -> Result<ResultOf<ShowDocument>, ClientError> {
        self.send_request::<ShowDocument>(params, cancel).await
    }

    /// Ask the client to create a work-done progress token before reporting
    /// `$/progress` against it.
    pub async fn create_work_done_progress(
        &self,
        token: ProgressToken,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.send_request::<WorkDoneProgressCreate>(WorkDoneProgressCreateParams { token }, cancel)
            .await
    }

    pub async fn apply_edit(
        &self,
        label: Option<String>,
        edit: WorkspaceEdit,
        cancel: &CancellationToken,
    ) -> Result<ResultOf<ApplyWorkspaceEdit>, ClientError> {
        self.send_request::<ApplyWorkspaceEdit>(ApplyWorkspaceEditParams { label, edit }, cancel)
            .await
    }

    pub async fn register_capability(
        &self,
        registrations: Vec<Registration>,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.send_request::<RegisterCapability>(RegistrationParams { registrations }, cancel)
            .await
    }

    pub async fn unregister_capability(
        &self,
        unregisterations: Vec<Unregistration>,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.send_request::<UnregisterCapability>(UnregistrationParams { unregisterations }, cancel)
            .await
    }

    /// Fetch configuration sections; one value per item, in order.
    pub async fn configuration(
        &self,
        items: Vec<ConfigurationItem>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, ClientError> {
        self.send_request::<WorkspaceConfiguration>(ConfigurationParams { items }, cancel)
            .await
    }

    pub async fn inlay_hint_refresh(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.send_request::<InlayHintRefreshRequest>((), cancel)
            .await
    }

    pub async fn inline_value_refresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.send_request::<InlineValueRefreshRequest>((), cancel)
            .await
    }

    pub async fn diagnostic_refresh(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.send_request::<WorkspaceDiagnosticRefresh>((), cancel)
            .await
    }

    pub async fn code_lens_refresh(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.send_request::<CodeLensRefresh>((), cancel).await
    }

    pub async fn semantic_tokens_refresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.send_request::<SemanticTokensRefresh>((), cancel).await
    }
}

fn encode_params<P: Serialize>(params: &P) -> Result<Option<Value>, ClientError> {
    match serde_json::to_value(params).map_err(ClientError::Serialize)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lspkit_jsonrpc::{Dispatcher, FrameReader, FrameWriter, Message, RequestId, Response};
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    struct Editor {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl Editor {
        async fn recv(&mut self) -> Message {
            tokio::time::timeout(Duration::from_secs(5), self.reader.read_message())
                .await
                .unwrap()
                .unwrap()
                .unwrap()
        }

        async fn reply(&mut self, id: RequestId, result: Result<Value, ResponseError>) {
            let msg = Message::Response(Response { id, result });
            self.writer.write_message(&msg).await.unwrap();
        }
    }

    fn connected() -> (Client, Editor, CancellationToken) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (local_read, local_write) = tokio::io::split(local);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let connection = Connection::new(local_read, local_write, Default::default());

        let shutdown = CancellationToken::new();
        let serving = connection.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { serving.serve(Dispatcher::new(), token).await });

        let editor = Editor {
            reader: FrameReader::new(remote_read),
            writer: FrameWriter::new(remote_write),
        };
        (Client::new(connection), editor, shutdown)
    }

    #[tokio::test]
    async fn test_log_message_wire_shape() {
        let (client, mut editor, _shutdown) = connected();
        client
            .log_message(MessageType::INFO, "hello")
            .await
            .unwrap();

        let Message::Notification(notification) = editor.recv().await else {
            panic!("expected notification");
        };
        assert_eq!(notification.method, "window/logMessage");
        assert_eq!(
            notification.params,
            Some(json!({"type": 3, "message": "hello"}))
        );
    }

    #[tokio::test]
    async fn test_publish_diagnostics_wire_shape() {
        let (client, mut editor, _shutdown) = connected();
        let uri: Uri = "file:///tmp/a.txt".parse().unwrap();
        client
            .publish_diagnostics(uri, Vec::new(), Some(4))
            .await
            .unwrap();

        let Message::Notification(notification) = editor.recv().await else {
            panic!("expected notification");
        };
        assert_eq!(notification.method, "textDocument/publishDiagnostics");
        let params = notification.params.unwrap();
        assert_eq!(params["uri"], "file:///tmp/a.txt");
        assert_eq!(params["version"], 4);
        assert_eq!(params["diagnostics"], json!([]));
    }

    #[tokio::test]
    async fn test_refresh_sends_no_params_and_accepts_null() {
        let (client, mut editor, _shutdown) = connected();
        let token = CancellationToken::new();
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.code_lens_refresh(&token).await }
        });

        let Message::Request(request) = editor.recv().await else {
            panic!("expected request");
        };
        assert_eq!(request.method, "workspace/codeLens/refresh");
        assert!(request.params.is_none());
        editor.reply(request.id, Ok(Value::Null)).await;
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_configuration_returns_values_in_order() {
        let (client, mut editor, _shutdown) = connected();
        let token = CancellationToken::new();
        let call = tokio::spawn({
            let client = client.clone();
            async move {
                let items = vec![
                    ConfigurationItem {
                        scope_uri: None,
                        section: Some("demo.a".to_string()),
                    },
                    ConfigurationItem {
                        scope_uri: None,
                        section: Some("demo.b".to_string()),
                    },
                ];
                client.configuration(items, &token).await
            }
        });

        let Message::Request(request) = editor.recv().await else {
            panic!("expected request");
        };
        assert_eq!(request.method, "workspace/configuration");
        let params = request.params.as_ref().unwrap();
        assert_eq!(params["items"][1]["section"], "demo.b");
        editor.reply(request.id, Ok(json!([1, {"x": true}]))).await;
        let values = call.await.unwrap().unwrap();
        assert_eq!(values, vec![json!(1), json!({"x": true})]);
    }

    #[tokio::test]
    async fn test_error_response_surfaces_as_client_error() {
        let (client, mut editor, _shutdown) = connected();
        let token = CancellationToken::new();
        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .create_work_done_progress(ProgressToken::Number(1), &token)
                    .await
            }
        });

        let Message::Request(request) = editor.recv().await else {
            panic!("expected request");
        };
        assert_eq!(request.method, "window/workDoneProgress/create");
        let refused = ResponseError::request_failed("no progress UI");
        editor.reply(request.id, Err(refused)).await;
        match call.await.unwrap() {
            Err(ClientError::Response(err)) => assert_eq!(err.message, "no progress UI"),
            other => panic!("expected response error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_result_is_deserialize_error() {
        let (client, mut editor, _shutdown) = connected();
        let token = CancellationToken::new();
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.configuration(Vec::new(), &token).await }
        });

        let Message::Request(request) = editor.recv().await else {
            panic!("expected request");
        };
        editor.reply(request.id, Ok(json!("not an array"))).await;
        assert!(matches!(call.await.unwrap(), Err(ClientError::Deserialize(_))));
    }

    #[tokio::test]
    async fn test_cancelled_request_is_call_error() {
        let (client, mut editor, _shutdown) = connected();
        let token = CancellationToken::new();
        let call = tokio::spawn({
            let client = client.clone();
            let token = token.clone();
            async move { client.inlay_hint_refresh(&token).await }
        });

        let _ = editor.recv().await;
        token.cancel();
        assert!(matches!(
            call.await.unwrap(),
            Err(ClientError::Call(CallError::Cancelled))
        ));
        assert_eq!(client.connection().pending_calls(), 0);
    }
}
