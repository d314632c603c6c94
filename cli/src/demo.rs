//! The demo server's routes.

use lspkit_server::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionResponse, Diagnostic, DiagnosticSeverity,
    Documentation, Hover, HoverContents, MarkupContent, MarkupKind, MessageType, Position, Range,
};
use lspkit_server::{Server, ServerConfig};

use crate::documents::Documents;

const KEYWORDS: &[(&str, &str)] = &[
    ("fn", "Declares a function."),
    ("let", "Binds a value to a name."),
    ("match", "Branches on the shape of a value."),
    ("struct", "Declares a record type."),
    ("impl", "Attaches methods or a trait to a type."),
];

const MARKER: &str = "TODO";

pub fn server(config: ServerConfig, documents: Documents) -> Server {
    let opened = documents.clone();
    let changed = documents.clone();
    let closed = documents.clone();

    Server::builder(config)
        .hover(|params, _cx| async move {
            let Position { line, character } = params.text_document_position_params.position;
            Ok(Some(Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: format!("line {line}, character {character}"),
                }),
                range: None,
            }))
        })
        .completion(|_params, _cx| async {
            let items = KEYWORDS
                .iter()
                .map(|(label, _)| CompletionItem {
                    label: (*label).to_string(),
                    kind: Some(CompletionItemKind::KEYWORD),
                    ..Default::default()
                })
                .collect();
            Ok(Some(CompletionResponse::Array(items)))
        })
        .completion_resolve(|mut item, _cx| async move {
            if let Some((_, doc)) = KEYWORDS.iter().find(|(label, _)| *label == item.label) {
                item.detail = Some(format!("keyword `{}`", item.label));
                item.documentation = Some(Documentation::String((*doc).to_string()));
            }
            Ok(item)
        })
        .did_open(move |params, _cx| {
            let document = params.text_document;
            opened.open(document.uri, document.text);
            async { Ok(()) }
        })
        .did_change(move |params, _cx| {
            changed.change(&params.text_document.uri, params.content_changes);
            async { Ok(()) }
        })
        .did_close(move |params, cx| {
            closed.close(&params.text_document.uri);
            async move {
                cx.client()
                    .publish_diagnostics(params.text_document.uri, Vec::new(), None)
                    .await?;
                Ok(())
            }
        })
        .did_save(move |params, cx| {
            let uri = params.text_document.uri;
            let text = params.text.or_else(|| documents.text(&uri));
            async move {
                let Some(text) = text else {
                    tracing::debug!("Saved document {uri:?} has no known text");
                    return Ok(());
                };
                let diagnostics = todo_diagnostics(&text);
                let count = diagnostics.len();
                cx.client()
                    .publish_diagnostics(uri, diagnostics, None)
                    .await?;
                let message = format!("Found {count} {MARKER} marker(s)");
                cx.client().log_message(MessageType::INFO, message).await?;
                Ok(())
            }
        })
        .build()
}

/// One warning per `TODO` occurrence, with UTF-16 columns.
pub fn todo_diagnostics(text: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for (line, content) in (0u32..).zip(text.lines()) {
        for (byte, _) in content.match_indices(MARKER) {
            let start = utf16_len(&content[..byte]);
            let end = start + utf16_len(MARKER);
            diagnostics.push(Diagnostic {
                range: Range::new(Position::new(line, start), Position::new(line, end)),
                severity: Some(DiagnosticSeverity::WARNING),
                source: Some("lspkit-demo".to_string()),
                message: format!("{MARKER} marker"),
                ..Default::default()
            });
        }
    }
    diagnostics
}

fn utf16_len(s: &str) -> u32 {
    u32::try_from(s.encode_utf16().count()).unwrap_or(u32::MAX)
}
