//! Workspace file collector.
//!
//! Turns inclusion globs plus exclusion globs (explicit and derived from
//! ignore-files) into a token-budgeted block of file contents for a prompt.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::tokens::count_tokens;
use crate::error::TaskError;
use crate::io::globs::{absolute_pattern, build_glob_set};
use crate::io::ignore_files::find_ignore_patterns;

/// Parameters for one collection pass.
#[derive(Debug, Clone)]
pub struct CollectRequest {
    /// Absolute, existing directory the patterns are resolved against.
    pub base_dir: PathBuf,
    /// Inclusion globs. Relative patterns are anchored at `base_dir`.
    pub patterns: Vec<String>,
    /// Exclusion globs. Relative patterns are anchored at `base_dir`.
    pub ignore_patterns: Vec<String>,
    /// Also exclude entries of every `.gitignore` in the tree.
    pub use_ignore_files: bool,
    /// Contents longer than this many characters are truncated to it.
    pub max_file_size: usize,
    /// Token budget for the concatenated file blocks.
    pub max_tokens: usize,
    pub max_files: Option<usize>,
}

/// Outcome of a collection pass. Paths are relative to the base directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCollection {
    /// Concatenated ``File <path>: ```<contents>``` `` blocks.
    pub prompt: String,
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    /// Processed files whose contents were cut at `max_file_size`.
    pub truncated: Vec<String>,
    /// Token count of `prompt`.
    pub tokens: usize,
}

impl FileCollection {
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

/// Collect matching files under `request.base_dir`.
///
/// Files are visited in file-name order. A file that does not fit the token
/// budget or the file-count cap is recorded as skipped and the scan goes on.
#[instrument(
    skip_all,
    fields(base_dir = %request.base_dir.display(), patterns = request.patterns.len())
)]
pub fn collect_files(request: &CollectRequest) -> Result<FileCollection> {
    let base = request.base_dir.as_path();
    validate_base_dir(base)?;

    let mut collection = FileCollection::default();
    if request.patterns.is_empty() {
        return Ok(collection);
    }

    let include = build_glob_set(
        request
            .patterns
            .iter()
            .map(|pattern| absolute_pattern(base, pattern)),
    )?;
    let mut exclude_patterns: Vec<String> = request
        .ignore_patterns
        .iter()
        .map(|pattern| absolute_pattern(base, pattern))
        .collect();
    if request.use_ignore_files {
        exclude_patterns.extend(find_ignore_patterns(base)?);
    }
    let exclude = build_glob_set(&exclude_patterns)?;

    let walker = WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !exclude.is_match(entry.path()));

    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", base.display()))?;
        if !entry.file_type().is_file() || !include.is_match(entry.path()) {
            continue;
        }
        let rel = relative_path(base, entry.path());
        let bytes =
            fs::read(entry.path()).with_context(|| format!("read {}", entry.path().display()))?;
        let mut contents = String::from_utf8_lossy(&bytes).into_owned();
        let was_truncated = truncate_chars(&mut contents, request.max_file_size);

        let block = format!("File {rel}: ```{contents}```\n\n");
        let block_tokens = count_tokens(&block);
        let within_tokens = collection.tokens + block_tokens <= request.max_tokens;
        let within_count = request
            .max_files
            .is_none_or(|max| collection.processed.len() < max);

        if within_tokens && within_count {
            debug!(file = %rel, tokens = block_tokens, truncated = was_truncated, "file collected");
            collection.prompt.push_str(&block);
            collection.tokens += block_tokens;
            if was_truncated {
                collection.truncated.push(rel.clone());
            }
            collection.processed.push(rel);
        } else {
            debug!(file = %rel, tokens = block_tokens, within_tokens, within_count, "file skipped");
            collection.skipped.push(rel);
        }
    }

    if !collection.skipped.is_empty() {
        warn!(
            skipped = collection.skipped.len(),
            max_tokens = request.max_tokens,
            "some files did not fit the collection budget"
        );
    }
    Ok(collection)
}

fn validate_base_dir(base: &Path) -> Result<()> {
    if !base.is_absolute() {
        return Err(TaskError::config(format!(
            "base directory {} must be an absolute path",
            base.display()
        ))
        .into());
    }
    if !base.is_dir() {
        return Err(TaskError::config(format!(
            "base directory {} does not exist",
            base.display()
        ))
        .into());
    }
    Ok(())
}

/// `path` relative to `base`, with `/` separators.
fn relative_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Cut `text` to at most `max_chars` characters. Returns whether it was cut.
fn truncate_chars(text: &mut String, max_chars: usize) -> bool {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            text.truncate(byte_idx);
            true
        }
        None => false,
    }
}
