//! Open document text, kept in sync from `didOpen`/`didChange`/`didClose`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lspkit_server::lsp_types::{Position, TextDocumentContentChangeEvent, Uri};

#[derive(Clone, Default)]
pub struct Documents {
    texts: Arc<Mutex<HashMap<Uri, String>>>,
}

impl Documents {
    fn texts(&self) -> MutexGuard<'_, HashMap<Uri, String>> {
        self.texts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self, uri: Uri, text: String) {
        self.texts().insert(uri, text);
    }

    /// Apply changes in order. Unknown documents are ignored.
    pub fn change(&self, uri: &Uri, changes: Vec<TextDocumentContentChangeEvent>) {
        let mut texts = self.texts();
        let Some(text) = texts.get_mut(uri) else {
            tracing::debug!("Change for unopened document {uri:?}");
            return;
        };
        for change in changes {
            apply(text, change);
        }
    }

    pub fn close(&self, uri: &Uri) {
        self.texts().remove(uri);
    }

    pub fn text(&self, uri: &Uri) -> Option<String> {
        self.texts().get(uri).cloned()
    }
}

fn apply(text: &mut String, change: TextDocumentContentChangeEvent) {
    match change.range {
        None => *text = change.text,
        Some(range) => {
            let start = offset(text, range.start);
            let end = offset(text, range.end).max(start);
            text.replace_range(start..end, &change.text);
        }
    }
}

/// Byte offset of an LSP position (UTF-16 columns), clamped to the line end.
fn offset(text: &str, position: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }
    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);

    let mut units = 0u32;
    for (i, ch) in text[line_start..line_end].char_indices() {
        if units >= position.character {
            return line_start + i;
        }
        units += u32::try_from(ch.len_utf16()).unwrap_or(1);
    }
    line_end
}
