//! # Configuration
//!
//! Daybook settings are declared with [`confique`] and resolved from
//! environment variables over compiled defaults. There is no config file:
//! embedding applications own that and hand values to the backend
//! constructors directly.
//!
//! ## Available Settings
//!
//! | Key | Env | Default | Description |
//! |-----|-----|---------|-------------|
//! | `storage_dir` | `DAYBOOK_DIR` | `~/.daybook` | Directory of the file store (`~` is expanded) |
//! | `file_ext` | `DAYBOOK_FILE_EXT` | `.md` | Extension of journal files |
//! | `refresh_interval_secs` | `DAYBOOK_REFRESH_SECS` | `300` | Remote cache time-to-live |
//! | `log_level` | `DAYBOOK_LOG` | `info` | `tracing` env-filter directive |

use crate::error::{DaybookError, Result};
use confique::Config;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DaybookConfig {
    /// Directory holding one file per day.
    #[config(env = "DAYBOOK_DIR", default = "~/.daybook")]
    pub storage_dir: String,

    /// Extension for journal files (e.g. ".md", ".txt")
    #[config(env = "DAYBOOK_FILE_EXT", default = ".md")]
    pub file_ext: String,

    /// Seconds a remote collection stays fresh.
    #[config(env = "DAYBOOK_REFRESH_SECS", default = 300)]
    pub refresh_interval_secs: u64,

    #[config(env = "DAYBOOK_LOG", default = "info")]
    pub log_level: String,
}

impl Default for DaybookConfig {
    fn default() -> Self {
        Self {
            storage_dir: "~/.daybook".to_string(),
            file_ext: ".md".to_string(),
            refresh_interval_secs: 300,
            log_level: "info".to_string(),
        }
    }
}

impl DaybookConfig {
    /// Resolve environment overrides over the defaults.
    pub fn load() -> Result<Self> {
        <Self as Config>::builder()
            .env()
            .load()
            .map_err(|e| DaybookError::Validation(format!("configuration: {}", e)))
    }

    pub fn storage_dir(&self) -> PathBuf {
        expand_path(&self.storage_dir)
    }

    /// The file extension, normalized to start with a dot.
    pub fn file_ext(&self) -> String {
        normalize_ext(&self.file_ext)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

pub(crate) fn normalize_ext(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    match (raw, home) {
        ("~", Some(home)) => home,
        (_, Some(home)) if raw.starts_with("~/") => home.join(&raw[2..]),
        _ => Path::new(raw).to_path_buf(),
    }
}
