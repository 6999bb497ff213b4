use crate::tree::snapshot::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Current `library.json` schema version.
pub const CONFIG_VERSION: u32 = 1;

/// File types indexed by a freshly initialized library.
pub const DEFAULT_FILE_TYPES: &[&str] = &[
    "adoc", "bib", "gif", "jpeg", "jpg", "json", "md", "pdf", "png", "svg", "tif", "tiff", "txt",
];

/// Upper bound on stored text per document.
pub const DEFAULT_MAX_TEXT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} has version {found}, newer than supported version {max}", max = CONFIG_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Per-library settings stored in `.doc/library.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryConfig {
    #[serde(alias = "__version")]
    pub version: u32,
    /// Extensions (without dot) whose content is extracted and indexed.
    pub types: Vec<String>,
    pub detect_moves: bool,
    /// Store a SHA-256 content fingerprint with every document.
    pub fingerprint: bool,
    pub max_text_bytes: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            version: CONFIG_VERSION,
            types: DEFAULT_FILE_TYPES.iter().map(|t| t.to_string()).collect(),
            detect_moves: true,
            fingerprint: false,
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }
}

impl LibraryConfig {
    /// Loads the configuration at `path`, writing the default first if the
    /// file does not exist yet. Older schemas are migrated and saved back.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = LibraryConfig::default();
            config.save(path)?;
            info!(path = %path.display(), "Created default library configuration");
            return Ok(config);
        }

        let data = fs::read(path)?;
        let config: LibraryConfig =
            serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let original_version = config.version;
        let config = config.migrate(path)?;
        if config.version != original_version {
            config.save(path)?;
        }
        Ok(config)
    }

    /// Atomically writes the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(self).map_err(io::Error::from)?;
        write_atomic(path, &data)?;
        Ok(())
    }

    /// Brings an older configuration up to [`CONFIG_VERSION`].
    pub fn migrate(mut self, path: &Path) -> Result<Self, ConfigError> {
        if self.version > CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: self.version,
            });
        }

        if self.version < CONFIG_VERSION {
            // v0 allowed mixed-case extensions with a leading dot
            self.types = self
                .types
                .iter()
                .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
                .collect();
            self.version = CONFIG_VERSION;
        }
        Ok(self)
    }

    pub fn is_indexable(&self, extension: &str) -> bool {
        !extension.is_empty() && self.types.iter().any(|t| t.eq_ignore_ascii_case(extension))
    }
}
