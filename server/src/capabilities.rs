//! Capability negotiation.
//!
//! The builder records a [`Feature`] for every optional contract it installs
//! a handler for. At handshake time those features become the detected
//! [`ServerCapabilities`], which are then merged under whatever the
//! application's initialize hook set explicitly.

use std::collections::BTreeSet;

use lsp_types::notification::{self, Notification as _};
use lsp_types::request::{self, Request as _};
use lsp_types::{
    CallHierarchyServerCapability, CodeActionOptions, CodeActionProviderCapability,
    CodeLensOptions, ColorProviderCapability, CompletionOptions, DeclarationCapability,
    DiagnosticOptions, DiagnosticServerCapabilities, DocumentLinkOptions, FileOperationFilter,
    FileOperationPattern, FileOperationRegistrationOptions, FoldingRangeProviderCapability,
    HoverProviderCapability, ImplementationProviderCapability, InlayHintOptions,
    InlayHintServerCapabilities, LinkedEditingRangeServerCapabilities, OneOf, RenameOptions,
    SaveOptions, SelectionRangeProviderCapability, SemanticTokensFullOptions,
    SemanticTokensOptions, SemanticTokensServerCapabilities, ServerCapabilities,
    SignatureHelpOptions, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions, TextDocumentSyncSaveOptions, TypeDefinitionProviderCapability,
    WorkDoneProgressOptions, WorkspaceFileOperationsServerCapabilities,
    WorkspaceServerCapabilities,
};
use serde_json::Value;

/// Glob used for every detected file-operation filter.
pub const ALL_FILES_GLOB: &str = "**/*";

/// An optional contract a server can satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    DidOpen,
    DidChange,
    DidClose,
    DidSave,
    WillSave,
    WillSaveWaitUntil,
    Hover,
    Completion,
    CompletionResolve,
    SignatureHelp,
    Declaration,
    Definition,
    TypeDefinition,
    Implementation,
    References,
    DocumentHighlight,
    DocumentSymbol,
    WorkspaceSymbol,
    CodeAction,
    CodeActionResolve,
    CodeLens,
    CodeLensResolve,
    DocumentLink,
    DocumentLinkResolve,
    DocumentColor,
    Formatting,
    RangeFormatting,
    Rename,
    PrepareRename,
    FoldingRange,
    SelectionRange,
    LinkedEditingRange,
    CallHierarchy,
    Moniker,
    InlayHint,
    InlayHintResolve,
    InlineValue,
    DocumentDiagnostic,
    WorkspaceDiagnostic,
    WillCreateFiles,
    WillRenameFiles,
    WillDeleteFiles,
    TypeHierarchy,
    SemanticTokensFull,
    SemanticTokensFullDelta,
    SemanticTokensRange,
}

const METHOD_FEATURES: &[(&str, Feature)] = &[
    (notification::DidOpenTextDocument::METHOD, Feature::DidOpen),
    (notification::DidChangeTextDocument::METHOD, Feature::DidChange),
    (notification::DidCloseTextDocument::METHOD, Feature::DidClose),
    (notification::DidSaveTextDocument::METHOD, Feature::DidSave),
    (notification::WillSaveTextDocument::METHOD, Feature::WillSave),
    (request::WillSaveWaitUntil::METHOD, Feature::WillSaveWaitUntil),
    (request::HoverRequest::METHOD, Feature::Hover),
    (request::Completion::METHOD, Feature::Completion),
    (request::ResolveCompletionItem::METHOD, Feature::CompletionResolve),
    (request::SignatureHelpRequest::METHOD, Feature::SignatureHelp),
    (request::GotoDeclaration::METHOD, Feature::Declaration),
    (request::GotoDefinition::METHOD, Feature::Definition),
    (request::GotoTypeDefinition::METHOD, Feature::TypeDefinition),
    (request::GotoImplementation::METHOD, Feature::Implementation),
    (request::References::METHOD, Feature::References),
    (request::DocumentHighlightRequest::METHOD, Feature::DocumentHighlight),
    (request::DocumentSymbolRequest::METHOD, Feature::DocumentSymbol),
    (request::WorkspaceSymbolRequest::METHOD, Feature::WorkspaceSymbol),
    (request::CodeActionRequest::METHOD, Feature::CodeAction),
    (request::CodeActionResolveRequest::METHOD, Feature::CodeActionResolve),
    (request::CodeLensRequest::METHOD, Feature::CodeLens),
    (request::CodeLensResolve::METHOD, Feature::CodeLensResolve),
    (request::DocumentLinkRequest::METHOD, Feature::DocumentLink),
    (request::DocumentLinkResolve::METHOD, Feature::DocumentLinkResolve),
    (request::DocumentColor::METHOD, Feature::DocumentColor),
    (request::Formatting::METHOD, Feature::Formatting),
    (request::RangeFormatting::METHOD, Feature::RangeFormatting),
    (request::Rename::METHOD, Feature::Rename),
    (request::PrepareRenameRequest::METHOD, Feature::PrepareRename),
    (request::FoldingRangeRequest::METHOD, Feature::FoldingRange),
    (request::SelectionRangeRequest::METHOD, Feature::SelectionRange),
    (request::LinkedEditingRange::METHOD, Feature::LinkedEditingRange),
    (request::CallHierarchyPrepare::METHOD, Feature::CallHierarchy),
    (request::MonikerRequest::METHOD, Feature::Moniker),
    (request::InlayHintRequest::METHOD, Feature::InlayHint),
    (request::InlayHintResolveRequest::METHOD, Feature::InlayHintResolve),
    (request::InlineValueRequest::METHOD, Feature::InlineValue),
    (request::DocumentDiagnosticRequest::METHOD, Feature::DocumentDiagnostic),
    (request::WorkspaceDiagnosticRequest::METHOD, Feature::WorkspaceDiagnostic),
    (request::WillCreateFiles::METHOD, Feature::WillCreateFiles),
    (request::WillRenameFiles::METHOD, Feature::WillRenameFiles),
    (request::WillDeleteFiles::METHOD, Feature::WillDeleteFiles),
    (request::TypeHierarchyPrepare::METHOD, Feature::TypeHierarchy),
    (request::SemanticTokensFullRequest::METHOD, Feature::SemanticTokensFull),
    (request::SemanticTokensFullDeltaRequest::METHOD, Feature::SemanticTokensFullDelta),
    (request::SemanticTokensRangeRequest::METHOD, Feature::SemanticTokensRange),
];

impl Feature {
    /// The feature a route for `method` satisfies, if any.
    #[must_use]
    pub fn for_method(method: &str) -> Option<Self> {
        METHOD_FEATURES
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, feature)| *feature)
    }
}

/// The set of features a server registered handlers for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features(BTreeSet<Feature>);

impl Features {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: Feature) {
        self.0.insert(feature);
    }

    #[must_use]
    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Feature> for Features {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Derive the advertised capabilities from the registered features.
///
/// Dependent sub-flags (completion resolve, prepare rename, ...) are only set
/// when their base feature is present.
#[must_use]
pub fn detect_capabilities(
    features: &Features,
    sync_kind: TextDocumentSyncKind,
) -> ServerCapabilities {
    let has = |feature| features.contains(feature);
    let flag = |feature| has(feature).then_some(true);

    ServerCapabilities {
        text_document_sync: text_document_sync(features, sync_kind),
        hover_provider: has(Feature::Hover).then_some(HoverProviderCapability::Simple(true)),
        completion_provider: has(Feature::Completion).then(|| CompletionOptions {
            resolve_provider: flag(Feature::CompletionResolve),
            ..Default::default()
        }),
        signature_help_provider: has(Feature::SignatureHelp).then(SignatureHelpOptions::default),
        declaration_provider: has(Feature::Declaration)
            .then_some(DeclarationCapability::Simple(true)),
        definition_provider: has(Feature::Definition).then_some(OneOf::Left(true)),
        type_definition_provider: has(Feature::TypeDefinition)
            .then_some(TypeDefinitionProviderCapability::Simple(true)),
        implementation_provider: has(Feature::Implementation)
            .then_some(ImplementationProviderCapability::Simple(true)),
        references_provider: has(Feature::References).then_some(OneOf::Left(true)),
        document_highlight_provider: has(Feature::DocumentHighlight).then_some(OneOf::Left(true)),
        document_symbol_provider: has(Feature::DocumentSymbol).then_some(OneOf::Left(true)),
        workspace_symbol_provider: has(Feature::WorkspaceSymbol).then_some(OneOf::Left(true)),
        code_action_provider: has(Feature::CodeAction).then(|| {
            if has(Feature::CodeActionResolve) {
                CodeActionProviderCapability::Options(CodeActionOptions {
                    resolve_provider: Some(true),
                    ..Default::default()
                })
            } else {
                CodeActionProviderCapability::Simple(true)
            }
        }),
        code_lens_provider: has(Feature::CodeLens).then(|| CodeLensOptions {
            resolve_provider: flag(Feature::CodeLensResolve),
        }),
        document_link_provider: has(Feature::DocumentLink).then(|| DocumentLinkOptions {
            resolve_provider: flag(Feature::DocumentLinkResolve),
            work_done_progress_options: WorkDoneProgressOptions::default(),
        }),
        color_provider: has(Feature::DocumentColor)
            .then_some(ColorProviderCapability::Simple(true)),
        document_formatting_provider: has(Feature::Formatting).then_some(OneOf::Left(true)),
        document_range_formatting_provider: has(Feature::RangeFormatting)
            .then_some(OneOf::Left(true)),
        rename_provider: has(Feature::Rename).then(|| {
            if has(Feature::PrepareRename) {
                OneOf::Right(RenameOptions {
                    prepare_provider: Some(true),
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                })
            } else {
                OneOf::Left(true)
            }
        }),
        folding_range_provider: has(Feature::FoldingRange)
            .then_some(FoldingRangeProviderCapability::Simple(true)),
        selection_range_provider: has(Feature::SelectionRange)
            .then_some(SelectionRangeProviderCapability::Simple(true)),
        linked_editing_range_provider: has(Feature::LinkedEditingRange)
            .then_some(LinkedEditingRangeServerCapabilities::Simple(true)),
        call_hierarchy_provider: has(Feature::CallHierarchy)
            .then_some(CallHierarchyServerCapability::Simple(true)),
        moniker_provider: has(Feature::Moniker).then_some(OneOf::Left(true)),
        inlay_hint_provider: has(Feature::InlayHint).then(|| {
            if has(Feature::InlayHintResolve) {
                OneOf::Right(InlayHintServerCapabilities::Options(InlayHintOptions {
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                    resolve_provider: Some(true),
                }))
            } else {
                OneOf::Left(true)
            }
        }),
        inline_value_provider: has(Feature::InlineValue).then_some(OneOf::Left(true)),
        diagnostic_provider: has(Feature::DocumentDiagnostic).then(|| {
            DiagnosticServerCapabilities::Options(DiagnosticOptions {
                workspace_diagnostics: has(Feature::WorkspaceDiagnostic),
                ..Default::default()
            })
        }),
        workspace: file_operations(features).map(|file_operations| WorkspaceServerCapabilities {
            file_operations: Some(file_operations),
            ..Default::default()
        }),
        semantic_tokens_provider: semantic_tokens(features),
        ..Default::default()
    }
}

fn file_operations(features: &Features) -> Option<WorkspaceFileOperationsServerCapabilities> {
    let all_files = |feature| {
        features.contains(feature).then(|| FileOperationRegistrationOptions {
            filters: vec![FileOperationFilter {
                scheme: None,
                pattern: FileOperationPattern {
                    glob: ALL_FILES_GLOB.to_string(),
                    ..Default::default()
                },
            }],
        })
    };
    let operations = WorkspaceFileOperationsServerCapabilities {
        will_create: all_files(Feature::WillCreateFiles),
        will_rename: all_files(Feature::WillRenameFiles),
        will_delete: all_files(Feature::WillDeleteFiles),
        ..Default::default()
    };
    (operations != WorkspaceFileOperationsServerCapabilities::default()).then_some(operations)
}

/// The legend is left empty; an application with real token types sets
/// `semantic_tokens_provider` from its initialize hook.
fn semantic_tokens(features: &Features) -> Option<SemanticTokensServerCapabilities> {
    let full = features.contains(Feature::SemanticTokensFull).then(|| {
        if features.contains(Feature::SemanticTokensFullDelta) {
            SemanticTokensFullOptions::Delta { delta: Some(true) }
        } else {
            SemanticTokensFullOptions::Bool(true)
        }
    });
    let range = features
        .contains(Feature::SemanticTokensRange)
        .then_some(true);
    if full.is_none() && range.is_none() {
        return None;
    }
    Some(SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
        full,
        range,
        ..Default::default()
    }))
}

/// Capabilities `ServerCapabilities` has no field for, added to the
/// serialized object unless already present.
pub fn advertise_unmodelled(features: &Features, capabilities: &mut Value) {
    let Some(object) = capabilities.as_object_mut() else {
        return;
    };
    if features.contains(Feature::TypeHierarchy) {
        object
            .entry("typeHierarchyProvider")
            .or_insert(Value::Bool(true));
    }
}

fn text_document_sync(
    features: &Features,
    sync_kind: TextDocumentSyncKind,
) -> Option<TextDocumentSyncCapability> {
    let open_close = features.contains(Feature::DidOpen) || features.contains(Feature::DidClose);
    let change = features.contains(Feature::DidChange);
    if !open_close && !change {
        return None;
    }

    let flag = |feature| features.contains(feature).then_some(true);
    Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
        open_close: open_close.then_some(true),
        change: change.then_some(sync_kind),
        will_save: flag(Feature::WillSave),
        will_save_wait_until: flag(Feature::WillSaveWaitUntil),
        save: features.contains(Feature::DidSave).then(|| {
            TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                include_text: Some(true),
            })
        }),
    }))
}

macro_rules! fill_unset {
    ($explicit:ident, $detected:ident; $($field:ident),+ $(,)?) => {
        $(
            if $explicit.$field.is_none() {
                $explicit.$field = $detected.$field;
            }
        )+
    };
}

/// Fill every capability the application left unset from `detected`.
/// Fields the application set are kept as-is, even when narrower.
#[must_use]
pub fn merge_capabilities(
    mut explicit: ServerCapabilities,
    detected: ServerCapabilities,
) -> ServerCapabilities {
    fill_unset!(explicit, detected;
        text_document_sync,
        hover_provider,
        completion_provider,
        signature_help_provider,
        declaration_provider,
        definition_provider,
        type_definition_provider,
        implementation_provider,
        references_provider,
        document_highlight_provider,
        document_symbol_provider,
        workspace_symbol_provider,
        code_action_provider,
        code_lens_provider,
        document_link_provider,
        color_provider,
        document_formatting_provider,
        document_range_formatting_provider,
        rename_provider,
        folding_range_provider,
        selection_range_provider,
        linked_editing_range_provider,
        call_hierarchy_provider,
        moniker_provider,
        inlay_hint_provider,
        inline_value_provider,
        diagnostic_provider,
        workspace,
        semantic_tokens_provider,
    );
    explicit
}
