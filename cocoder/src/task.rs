//! Task orchestration: drive prompt/response cycles to a terminal outcome.
//!
//! Each cycle sends one prompt through the [`CompletionSession`], decodes the
//! reply and dispatches on its outcome. Generated files are written under the
//! output directory, requested files are collected from the workspace and sent
//! back, and notes end the task. Budget and I/O errors propagate immediately;
//! work already written stays on disk.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, trace, warn};

use crate::core::cost::CostTable;
use crate::core::protocol::{Content, Outcome, PromptResponse, parse_prompt_response};
use crate::core::types::RunResult;
use crate::error::TaskError;
use crate::io::collector::{CollectRequest, FileCollection, collect_files};
use crate::io::config::{FilesConfig, RequestedFilesConfig};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::provider::CompletionProvider;
use crate::io::session::CompletionSession;

/// Sent after a `files-generated` reply that announced more files.
pub const CONTINUE_GENERATION_PROMPT: &str =
    "generate additional files or source codes. update already generated files if needed.";

/// Sent when requested files cannot or will not be supplied.
pub const PROCEED_WITHOUT_FILES_PROMPT: &str = "Proceed without additional files";

/// Settings shared by every cycle of a task.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Absolute workspace directory. Requested files are resolved against it.
    pub workspace_dir: PathBuf,
    /// Generated files land here. Relative paths are made absolute against
    /// the current directory.
    pub output_dir: PathBuf,
    /// Patterns and limits for workspace collections.
    pub files: FilesConfig,
    pub requested_files: RequestedFilesConfig,
    /// Conversation file restored by the caller.
    pub conversation_path: Option<PathBuf>,
    /// Rewrite `conversation_path` after every cycle. When unset the file is
    /// only read.
    pub save_conversation: bool,
    /// Model name used for the cost estimate.
    pub model: String,
}

/// A code-generation task over a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceTask {
    pub task: String,
    pub project_information: Option<String>,
    pub example: Option<String>,
    /// Token budget for the rendered initial prompt.
    pub prompt_budget_tokens: usize,
    pub options: TaskOptions,
}

enum Next {
    Prompt(String),
    Done,
}

/// Collect workspace files, render the initial prompt and run the task.
#[instrument(skip_all, fields(workspace = %task.options.workspace_dir.display()))]
pub fn run_workspace_task<P: CompletionProvider>(
    session: &mut CompletionSession<P>,
    task: &WorkspaceTask,
    costs: &CostTable,
) -> Result<RunResult> {
    let options = &task.options;
    let files = &options.files;

    debug!("preparing workspace files");
    let full = collect_files(&CollectRequest {
        base_dir: options.workspace_dir.clone(),
        patterns: files.patterns.clone(),
        ignore_patterns: files.ignore_patterns.clone(),
        use_ignore_files: files.use_ignore_files,
        max_file_size: files.max_file_size,
        max_tokens: files.max_tokens,
        max_files: None,
    })?;
    log_collection("full content files", &full);

    let preview = if files.preview_patterns.is_empty() {
        FileCollection::default()
    } else {
        let preview = collect_files(&CollectRequest {
            base_dir: options.workspace_dir.clone(),
            patterns: files.preview_patterns.clone(),
            ignore_patterns: files.ignore_patterns.clone(),
            use_ignore_files: files.use_ignore_files,
            max_file_size: files.preview_file_size,
            max_tokens: files.max_tokens,
            max_files: None,
        })?;
        log_collection("preview files", &preview);
        preview
    };

    let prompt = PromptBuilder::new(task.prompt_budget_tokens).build(&PromptInputs {
        task: task.task.clone(),
        project_information: task.project_information.clone(),
        full_files: full.prompt,
        preview_files: preview.prompt,
        example: task.example.clone(),
        max_requested_files: options.requested_files.max_files,
    })?;

    run_prompt_loop(session, &prompt, options, costs)
}

/// Run prompt/response cycles starting from `first_prompt` until a terminal
/// outcome is reached.
pub fn run_prompt_loop<P: CompletionProvider>(
    session: &mut CompletionSession<P>,
    first_prompt: &str,
    options: &TaskOptions,
    costs: &CostTable,
) -> Result<RunResult> {
    let output_dir = std::path::absolute(&options.output_dir)
        .with_context(|| format!("resolve output dir {}", options.output_dir.display()))?;
    let mut result = RunResult::default();
    let mut prompt = first_prompt.to_string();

    loop {
        info!("sending prompt to model");
        trace!(prompt = %prompt, "prompt");
        let output = session.send_prompt(&prompt)?;
        let save_to = options
            .conversation_path
            .as_deref()
            .filter(|_| options.save_conversation);
        if let Some(path) = save_to {
            session.save_conversation(path)?;
        }
        info!(
            tokens = output.session_input_tokens + output.session_output_tokens,
            "model invoked"
        );
        trace!(response = %output.response, "response");

        let response = decode_response(&output.response);
        let next = match &response.header.outcome {
            Outcome::FilesGenerated => {
                write_generated_files(&response.contents, &output_dir, &mut result)?;
                if response.footer.has_more_to_generate {
                    info!("asking for additional files to be generated");
                    Next::Prompt(CONTINUE_GENERATION_PROMPT.to_string())
                } else {
                    Next::Done
                }
            }
            Outcome::FilesRequested => {
                Next::Prompt(serve_requested_files(&response.contents, options, &mut result)?)
            }
            Outcome::NotesGenerated => {
                info!(notes = response.contents.len(), "notes generated");
                result
                    .notes
                    .extend(response.contents.into_iter().map(|content| content.body));
                Next::Done
            }
            Outcome::Unknown(outcome) => {
                return Err(TaskError::UnexpectedOutcome(outcome.clone()).into());
            }
        };

        match next {
            Next::Prompt(next_prompt) => prompt = next_prompt,
            Next::Done => break,
        }
    }

    result.stats = session.stats();
    match costs.estimate(&options.model, &result.stats) {
        Some(cost_usd) => info!(
            model = %options.model,
            prompts = result.stats.prompt_counter,
            tokens = result.stats.total_tokens(),
            cost_usd,
            "task finished"
        ),
        None => info!(
            model = %options.model,
            prompts = result.stats.prompt_counter,
            tokens = result.stats.total_tokens(),
            "task finished (no cost data for model)"
        ),
    }
    Ok(result)
}

/// Decode model text, degrading undecodable text to a single note.
fn decode_response(raw: &str) -> PromptResponse {
    match parse_prompt_response(raw) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "could not decode model response; keeping it as a note");
            PromptResponse::unparsable(raw)
        }
    }
}

fn write_generated_files(
    contents: &[Content],
    output_dir: &Path,
    result: &mut RunResult,
) -> Result<()> {
    info!(files = contents.len(), output_dir = %output_dir.display(), "files generated");
    for content in contents {
        if content.body.is_empty() {
            return Err(TaskError::EmptyGeneratedFile {
                filename: content.filename.clone(),
            }
            .into());
        }
        let rel = safe_relative_path(&content.filename)?;
        if !content.checksum_verified {
            warn!(
                file = %content.filename,
                declared = %content.declared_checksum,
                "generated file checksum mismatch"
            );
        }

        let path = output_dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, &content.body).with_context(|| format!("write {}", path.display()))?;
        debug!(file = %path.display(), bytes = content.body.len(), "file written");
        result.generated_files.push(path);
    }
    Ok(())
}

/// Reject filenames that would escape the output directory.
fn safe_relative_path(filename: &str) -> Result<&Path, TaskError> {
    let path = Path::new(filename);
    let escapes = filename.trim().is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(TaskError::UnsafeOutputPath {
            filename: filename.to_string(),
        });
    }
    Ok(path)
}

/// Answer a `files-requested` reply with the next prompt.
fn serve_requested_files(
    contents: &[Content],
    options: &TaskOptions,
    result: &mut RunResult,
) -> Result<String> {
    let requested: Vec<String> = contents
        .iter()
        .map(|content| content.filename.trim().trim_start_matches('/').to_string())
        .filter(|name| !name.is_empty())
        .collect();
    info!(files = requested.len(), round = result.file_request_rounds + 1, "files requested");

    let max_rounds = options.requested_files.max_rounds as usize;
    if result.file_request_rounds >= max_rounds {
        info!(max_rounds, "file request round cap reached; proceeding without files");
        return Ok(PROCEED_WITHOUT_FILES_PROMPT.to_string());
    }
    result.file_request_rounds += 1;

    let remaining = options
        .requested_files
        .max_files
        .saturating_sub(result.requested_files_served);
    let collection = collect_files(&CollectRequest {
        base_dir: options.workspace_dir.clone(),
        patterns: requested.clone(),
        ignore_patterns: options.files.ignore_patterns.clone(),
        use_ignore_files: options.files.use_ignore_files,
        max_file_size: options.files.max_file_size,
        max_tokens: options.files.max_tokens,
        max_files: Some(remaining),
    })?;
    result.requested_files_served += collection.processed.len();

    for name in &requested {
        let found = collection.processed.iter().any(|p| p == name)
            || collection.skipped.iter().any(|p| p == name);
        if !found {
            debug!(file = %name, "requested file not found in workspace");
        }
    }
    info!(
        served = collection.processed.len(),
        skipped = collection.skipped.len(),
        total_served = result.requested_files_served,
        "requested files collected"
    );

    if collection.is_empty() {
        Ok(PROCEED_WITHOUT_FILES_PROMPT.to_string())
    } else {
        Ok(collection.prompt)
    }
}

fn log_collection(kind: &str, collection: &FileCollection) {
    info!(
        kind,
        files = collection.processed.len(),
        tokens = collection.tokens,
        "workspace files collected"
    );
    if !collection.truncated.is_empty() {
        info!(kind, files = collection.truncated.len(), "truncated (max file size)");
        debug!(kind, files = ?collection.truncated, "truncated files");
    }
    if !collection.skipped.is_empty() {
        info!(kind, files = collection.skipped.len(), "skipped (max token limit)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_must_stay_inside_the_output_dir() {
        assert!(safe_relative_path("src/lib.rs").is_ok());
        assert!(safe_relative_path("./notes/todo.md").is_ok());
        for bad in ["/etc/passwd", "../outside.txt", "src/../../x", ""] {
            assert_eq!(
                safe_relative_path(bad).unwrap_err(),
                TaskError::UnsafeOutputPath {
                    filename: bad.to_string()
                },
                "{bad}"
            );
        }
    }

    #[test]
    fn undecodable_text_becomes_a_note() {
        let response = decode_response("I am not sure what you mean.");
        assert_eq!(response.header.outcome, Outcome::NotesGenerated);
        assert_eq!(
            response.contents[0].body,
            "Model response: I am not sure what you mean."
        );
    }
}
