//! Task configuration stored in `cocoder.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::budget::SessionLimits;
use crate::core::cost::CostTable;
use crate::error::TaskError;
use crate::io::provider::ModelConfig;

/// Task configuration (TOML).
///
/// Every field has a default, so an empty or missing file is valid. Command
/// line flags override individual values after loading. Provider secrets are
/// never read from here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoderConfig {
    /// Directory generated files are written under. Relative paths are
    /// resolved against the current directory.
    pub output_dir: PathBuf,

    pub completion: ModelConfig,

    pub session: SessionLimits,

    pub files: FilesConfig,

    pub requested_files: RequestedFilesConfig,

    /// USD per token, keyed by model name.
    pub costs: CostTable,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(".out"),
            completion: ModelConfig::default(),
            session: SessionLimits::default(),
            files: FilesConfig::default(),
            requested_files: RequestedFilesConfig::default(),
            costs: CostTable::default(),
        }
    }
}

/// Workspace files sent with the initial prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilesConfig {
    /// Globs whose full contents are sent.
    pub patterns: Vec<String>,

    /// Globs sent as truncated previews.
    pub preview_patterns: Vec<String>,

    pub ignore_patterns: Vec<String>,

    /// Exclude entries of `.gitignore` files found in the workspace.
    pub use_ignore_files: bool,

    /// Characters kept per full-content file.
    pub max_file_size: usize,

    /// Characters kept per preview file.
    pub preview_file_size: usize,

    /// Token budget for each collection.
    pub max_tokens: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            preview_patterns: Vec::new(),
            ignore_patterns: vec!["**/node_modules/**".to_string(), "**/.git/**".to_string()],
            use_ignore_files: true,
            max_file_size: 10_000,
            preview_file_size: 800,
            max_tokens: 5_000,
        }
    }
}

/// Limits on files the model may ask for mid-conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RequestedFilesConfig {
    /// Files served across the whole task.
    pub max_files: usize,

    /// `files-requested` rounds honoured before falling back.
    pub max_rounds: u32,
}

impl Default for RequestedFilesConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_rounds: 2,
        }
    }
}

impl CoderConfig {
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(TaskError::config("output_dir must not be empty"));
        }
        if self.completion.model.trim().is_empty() {
            return Err(TaskError::config("completion.model must not be empty"));
        }
        if self.completion.max_output_tokens == 0 {
            return Err(TaskError::config("completion.max_output_tokens must be > 0"));
        }
        if self.completion.request_timeout_secs == 0 {
            return Err(TaskError::config("completion.request_timeout_secs must be > 0"));
        }
        if self.session.max_prompts == 0 {
            return Err(TaskError::config("session.max_prompts must be > 0"));
        }
        if self.session.max_tokens_per_request == 0 {
            return Err(TaskError::config("session.max_tokens_per_request must be > 0"));
        }
        if self.session.max_tokens_total == 0 {
            return Err(TaskError::config("session.max_tokens_total must be > 0"));
        }
        if self.files.max_tokens == 0 {
            return Err(TaskError::config("files.max_tokens must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CoderConfig::default()`.
pub fn load_config(path: &Path) -> Result<CoderConfig> {
    if !path.exists() {
        let cfg = CoderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CoderConfig = toml::from_str(&contents)
        .map_err(|err| TaskError::config(format!("parse {}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}
