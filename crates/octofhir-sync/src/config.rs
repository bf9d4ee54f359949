use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::request::HttpVerb;

/// Default number of operations per transaction bundle.
pub const DEFAULT_BUNDLE_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SyncConfig {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.upload.validate()?;
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// How local changes are turned into requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    #[serde(default)]
    pub patch_mode: PatchMode,
    #[serde(default)]
    pub request: RequestConfig,
    /// Send `If-Match` with the base version of each change.
    #[serde(default = "default_true")]
    pub use_etag_for_upload: bool,
    #[serde(default)]
    pub fetch_mode: FetchMode,
    #[serde(default)]
    pub splitter: SplitterConfig,
}

fn default_true() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            patch_mode: PatchMode::default(),
            request: RequestConfig::default(),
            use_etag_for_upload: default_true(),
            fetch_mode: FetchMode::default(),
            splitter: SplitterConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), String> {
        match &self.request {
            RequestConfig::Bundle {
                create_verb,
                update_verb,
                max_bundle_size,
            } => {
                if *create_verb != HttpVerb::Put {
                    return Err(SyncError::unsupported_create_verb(*create_verb).to_string());
                }
                if *update_verb != HttpVerb::Patch {
                    return Err(SyncError::unsupported_update_verb(*update_verb).to_string());
                }
                if *max_bundle_size == 0 {
                    return Err("upload.request.max_bundle_size must be > 0".into());
                }
            }
            RequestConfig::Url {
                create_verb,
                update_verb,
            } => {
                if !matches!(create_verb, HttpVerb::Put | HttpVerb::Post) {
                    return Err(SyncError::unsupported_create_verb(*create_verb).to_string());
                }
                if *update_verb != HttpVerb::Patch {
                    return Err(SyncError::unsupported_update_verb(*update_verb).to_string());
                }
            }
        }
        match &self.splitter {
            SplitterConfig::Size { page_size } => {
                if *page_size == 0 {
                    return Err("upload.splitter.page_size must be > 0".into());
                }
            }
            SplitterConfig::SizeAndType {
                page_size,
                priority,
            } => {
                if *page_size == 0 {
                    return Err("upload.splitter.page_size must be > 0".into());
                }
                if priority.iter().any(|t| t.trim().is_empty()) {
                    return Err("upload.splitter.priority must not contain empty types".into());
                }
            }
        }
        Ok(())
    }
}

/// How journal entries are folded into local changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    /// Every journal entry is uploaded on its own.
    PerChange,
    /// All entries of a resource are squashed into one change.
    #[default]
    PerResource,
}

/// Which part of the journal each round processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Everything pending, in one batch.
    #[default]
    AllChanges,
}

/// Request shape and the verbs used for creations and updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RequestConfig {
    /// Transaction bundles.
    Bundle {
        #[serde(default = "default_bundle_create_verb")]
        create_verb: HttpVerb,
        #[serde(default = "default_update_verb")]
        update_verb: HttpVerb,
        #[serde(default = "default_bundle_size")]
        max_bundle_size: usize,
    },
    /// One request per resource.
    Url {
        #[serde(default = "default_url_create_verb")]
        create_verb: HttpVerb,
        #[serde(default = "default_update_verb")]
        update_verb: HttpVerb,
    },
}

fn default_bundle_create_verb() -> HttpVerb {
    HttpVerb::Put
}
fn default_url_create_verb() -> HttpVerb {
    HttpVerb::Put
}
fn default_update_verb() -> HttpVerb {
    HttpVerb::Patch
}
fn default_bundle_size() -> usize {
    DEFAULT_BUNDLE_SIZE
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self::Bundle {
            create_verb: default_bundle_create_verb(),
            update_verb: default_update_verb(),
            max_bundle_size: default_bundle_size(),
        }
    }
}

/// How a batch is split into upload-sized groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitterConfig {
    /// Fixed-size chunks in arrival order.
    Size {
        #[serde(default = "default_bundle_size")]
        page_size: usize,
    },
    /// Chunks grouped by resource type, listed types first.
    SizeAndType {
        #[serde(default = "default_bundle_size")]
        page_size: usize,
        #[serde(default)]
        priority: Vec<String>,
    },
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self::Size {
            page_size: default_bundle_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::SyncConfig;
    use crate::error::SyncError;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-sync.toml";

    pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, SyncError> {
        let mut builder = Config::builder();
        match path {
            Some(file) if !file.exists() => {
                return Err(SyncError::config(format!(
                    "config file not found: {}",
                    file.display()
                )));
            }
            Some(file) => builder = builder.add_source(File::from(file.to_path_buf())),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    builder = builder.add_source(File::from(default));
                }
            }
        }
        // Environment variable overrides, e.g., OCTOFHIR_SYNC__UPLOAD__PATCH_MODE=per_change
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_SYNC")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| SyncError::config(format!("config build error: {e}")))?;
        let merged: SyncConfig = cfg
            .try_deserialize()
            .map_err(|e| SyncError::config(format!("config deserialize error: {e}")))?;
        merged.validate().map_err(SyncError::config)?;
        Ok(merged)
    }
}
