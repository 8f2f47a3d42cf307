//! Glob construction over absolute paths.
//!
//! `*` and `?` never cross a path separator, `**` does, `{a,b}` alternation
//! and `[...]` classes are supported. Matching is case-sensitive.

use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::TaskError;

/// Resolve `pattern` against `base` unless it is already absolute.
pub fn absolute_pattern(base: &Path, pattern: &str) -> String {
    if Path::new(pattern).is_absolute() {
        return pattern.to_string();
    }
    let pattern = pattern.trim_start_matches("./");
    format!("{}/{}", escape_dir(base), pattern)
}

/// Escape glob meta-characters in a directory path, without a trailing slash.
pub fn escape_dir(dir: &Path) -> String {
    let raw = dir.to_string_lossy();
    globset::escape(raw.trim_end_matches('/'))
}

pub fn build_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// Compile `patterns` into one set. An invalid pattern is a configuration error.
pub fn build_glob_set<I, S>(patterns: I) -> Result<GlobSet>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = build_glob(pattern)
            .map_err(|err| TaskError::config(format!("invalid glob {pattern:?}: {err}")))?;
        builder.add(glob);
    }
    builder.build().context("build glob set")
}
