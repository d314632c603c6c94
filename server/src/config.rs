//! Server configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use lsp_types::TextDocumentSyncKind;
use lspkit_jsonrpc::codec::DEFAULT_MAX_FRAME_BYTES;
use serde::Deserialize;

/// Capacity of the debug traffic ring when none is configured.
pub const DEFAULT_TRAFFIC_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("max_frame_bytes must be greater than zero")]
    ZeroFrameLimit,
}

/// How document changes are advertised to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSync {
    #[default]
    Incremental,
    Full,
}

impl DocumentSync {
    #[must_use]
    pub fn kind(self) -> TextDocumentSyncKind {
        match self {
            Self::Incremental => TextDocumentSyncKind::INCREMENTAL,
            Self::Full => TextDocumentSyncKind::FULL,
        }
    }
}

/// ```toml
/// name = "my-server"
/// version = "0.3.1"
/// max_frame_bytes = 16777216
/// document_sync = "full"
/// debug_tap = true
/// traffic_capacity = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    name: String,
    version: Option<String>,
    max_frame_bytes: usize,
    document_sync: DocumentSync,
    debug_tap: bool,
    traffic_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::from("lspkit"),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            document_sync: DocumentSync::default(),
            debug_tap: false,
            traffic_capacity: DEFAULT_TRAFFIC_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        if config.max_frame_bytes == 0 {
            return Err(ConfigError::ZeroFrameLimit);
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_document_sync(mut self, sync: DocumentSync) -> Self {
        self.document_sync = sync;
        self
    }

    /// Zero is raised to one; a loaded config rejects it instead.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max.max(1);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    #[must_use]
    pub fn document_sync(&self) -> DocumentSync {
        self.document_sync
    }

    #[must_use]
    pub fn debug_tap(&self) -> bool {
        self.debug_tap
    }

    #[must_use]
    pub fn traffic_capacity(&self) -> usize {
        self.traffic_capacity
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(
            config.document_sync().kind(),
            TextDocumentSyncKind::INCREMENTAL
        );
        assert!(!config.debug_tap());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = ServerConfig::from_toml_str(
            r#"
            name = "demo"
            version = "9.9"
            document_sync = "full"
            debug_tap = true
            traffic_capacity = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.name(), "demo");
        assert_eq!(config.version(), Some("9.9"));
        assert_eq!(config.document_sync(), DocumentSync::Full);
        assert!(config.debug_tap());
        assert_eq!(config.traffic_capacity(), 12);
        assert_eq!(config.max_frame_bytes(), DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn test_unknown_keys_and_bad_values_are_rejected() {
        assert!(matches!(
            ServerConfig::from_toml_str("nmae = \"typo\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("document_sync = \"partial\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("max_frame_bytes = 0"),
            Err(ConfigError::ZeroFrameLimit)
        ));
    }

    #[test]
    fn test_zero_frame_limit_is_clamped_when_set_directly() {
        let clamped = ServerConfig::default().with_max_frame_bytes(0);
        assert_eq!(clamped.max_frame_bytes(), 1);
        let explicit = ServerConfig::default().with_max_frame_bytes(4096);
        assert_eq!(explicit.max_frame_bytes(), 4096);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"from-disk\"").unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.name(), "from-disk");
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
