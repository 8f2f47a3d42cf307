//! Test-only helpers: temporary workspaces, a scripted provider and
//! protocol response builders.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::core::protocol::{Content, Footer, Header, Outcome, PromptResponse, encode_response};
use crate::core::types::Turn;
use crate::io::provider::{Completion, CompletionProvider, FinishReason, Usage};

/// Temporary directory that is removed on drop.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp workspace")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` at `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.dir.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// Provider that replays queued completions and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Completion>>,
    requests: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Completion>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Conversations submitted so far, one entry per request.
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// The user turns submitted so far, in order.
    pub fn user_prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|turns| turns.last())
            .filter(|turn| turn.role == crate::core::types::Role::User)
            .map(|turn| turn.content.clone())
            .collect()
    }
}

impl CompletionProvider for ScriptedProvider {
    fn create_completion(&self, turns: &[Turn]) -> Result<Completion> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(turns.to_vec());
        match self.replies.lock().expect("replies lock").pop_front() {
            Some(completion) => Ok(completion),
            None => bail!("scripted provider has no more replies"),
        }
    }
}

/// A finished completion with nominal usage.
pub fn reply(text: &str) -> Completion {
    Completion {
        content: Some(text.to_string()),
        finish_reason: FinishReason::Stop,
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    }
}

/// A completion cut at the output length limit.
pub fn truncated(text: &str) -> Completion {
    Completion {
        finish_reason: FinishReason::Length,
        ..reply(text)
    }
}

impl Completion {
    pub fn with_usage(mut self, input_tokens: usize, output_tokens: usize) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn without_usage(mut self) -> Self {
        self.usage = None;
        self
    }
}

fn response(outcome: Outcome, contents: Vec<Content>, has_more_to_generate: bool) -> String {
    encode_response(&PromptResponse {
        header: Header {
            outcome,
            count: contents.len(),
        },
        contents,
        footer: Footer {
            has_more_to_generate,
        },
    })
}

/// Encoded `files-generated` response for `(filename, body)` pairs.
pub fn files_generated(files: &[(&str, &str)], has_more_to_generate: bool) -> String {
    let contents = files
        .iter()
        .map(|(name, body)| Content::new(*name, 8, "generated", *body))
        .collect();
    response(Outcome::FilesGenerated, contents, has_more_to_generate)
}

/// Encoded `files-requested` response naming `filenames`.
pub fn files_requested(filenames: &[&str]) -> String {
    let contents = filenames
        .iter()
        .map(|name| Content::new(*name, 7, "needed for context", ""))
        .collect();
    response(Outcome::FilesRequested, contents, false)
}

/// Encoded `notes-generated` response with one block per note.
pub fn notes(bodies: &[&str]) -> String {
    let contents = bodies
        .iter()
        .enumerate()
        .map(|(idx, body)| Content::new(format!("note-{}.txt", idx + 1), 5, "note", *body))
        .collect();
    response(Outcome::NotesGenerated, contents, false)
}

/// Encoded response with an arbitrary outcome string.
pub fn with_outcome(outcome: &str, files: &[(&str, &str)]) -> String {
    let contents = files
        .iter()
        .map(|(name, body)| Content::new(*name, 5, "m", *body))
        .collect();
    response(Outcome::parse(outcome), contents, false)
}
