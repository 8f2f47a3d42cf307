//! `.gitignore` files rewritten as absolute, directory-scoped globs.
//!
//! Only plain entries are honoured: blank lines and `#` comments are dropped,
//! negations (`!entry`) are not supported. Each entry applies to the subtree of
//! the directory holding the ignore-file, so nested ignore-files only shadow
//! their own subtree.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::io::globs::{build_glob, build_glob_set, escape_dir};

pub const IGNORE_FILE_NAME: &str = ".gitignore";

/// Rewrite the entries of an ignore-file found in `dir`.
///
/// `entry` becomes `<dir>/**/<entry>` and `<dir>/**/<entry>/**`, matching the
/// entry itself and everything beneath it at any depth below `dir`.
pub fn ignore_file_patterns(dir: &Path, contents: &str) -> Vec<String> {
    let scope = escape_dir(dir);
    let mut patterns = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('!') {
            debug!(dir = %dir.display(), entry = line, "negated ignore entry not supported");
            continue;
        }
        let entry = line.strip_prefix('/').unwrap_or(line).trim_end_matches('/');
        if entry.is_empty() {
            continue;
        }
        patterns.push(format!("{scope}/**/{entry}"));
        patterns.push(format!("{scope}/**/{entry}/**"));
    }
    patterns
}

/// Collect ignore patterns from every ignore-file in `base_dir` and below.
///
/// Subtrees excluded by the root ignore-file are not searched. Entries that do
/// not form a valid glob are dropped with a warning. Duplicates are removed,
/// first occurrence wins.
pub fn find_ignore_patterns(base_dir: &Path) -> Result<Vec<String>> {
    let root_patterns = read_ignore_file(base_dir)?;
    let root_set = build_glob_set(&root_patterns)?;

    let mut seen = HashSet::new();
    let mut patterns = Vec::new();
    let mut push_all = |found: Vec<String>| {
        for pattern in found {
            if seen.insert(pattern.clone()) {
                patterns.push(pattern);
            }
        }
    };
    push_all(root_patterns);

    let walker = WalkDir::new(base_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !root_set.is_match(entry.path()));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", base_dir.display()))?;
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            continue;
        }
        push_all(read_ignore_file(entry.path())?);
    }

    debug!(base_dir = %base_dir.display(), count = patterns.len(), "ignore patterns collected");
    Ok(patterns)
}

/// Patterns from `dir/.gitignore`, or nothing when the file is absent.
fn read_ignore_file(dir: &Path) -> Result<Vec<String>> {
    let path = dir.join(IGNORE_FILE_NAME);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let patterns = ignore_file_patterns(dir, &contents)
        .into_iter()
        .filter(|pattern| match build_glob(pattern) {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    file = %path.display(),
                    pattern,
                    error = %err,
                    "skipping invalid ignore entry"
                );
                false
            }
        })
        .collect();
    Ok(patterns)
}
