//! `cocoder`: generate code for a workspace task with an LLM.
//!
//! Collects workspace files into a prompt, converses with an OpenAI-compatible
//! model until it produces files or notes, and writes generated files to the
//! output directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use cocoder::core::types::RunResult;
use cocoder::error::TaskError;
use cocoder::exit_codes;
use cocoder::io::config::{CoderConfig, load_config};
use cocoder::io::provider::{AuthMethod, ChatCompletionsProvider, ProviderKind, ProviderSettings};
use cocoder::io::session::CompletionSession;
use cocoder::logging;
use cocoder::task::{TaskOptions, WorkspaceTask, run_workspace_task};

#[derive(Parser)]
#[command(
    name = "cocoder",
    version,
    about = "Generate code for a workspace task with an LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a code-generation task over a workspace.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// What the model should do.
    #[arg(long)]
    task: String,

    /// Workspace directory the file patterns are resolved against.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Globs of files sent with their full contents.
    #[arg(long, num_args = 1..)]
    files: Vec<String>,

    /// Globs excluded from every collection, added to the configured ones.
    #[arg(long = "files-ignore", num_args = 1..)]
    files_ignore: Vec<String>,

    /// Globs of files sent as truncated previews.
    #[arg(long, num_args = 1..)]
    preview: Vec<String>,

    /// Example the model should follow, or files to use as one.
    #[arg(long)]
    example: Option<String>,

    /// Background about the project.
    #[arg(long)]
    info: Option<String>,

    /// Model name (deployment name for Azure).
    #[arg(long)]
    model: Option<String>,

    /// Directory generated files are written to.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    max_tokens_total: Option<usize>,

    #[arg(long)]
    max_tokens_per_request: Option<usize>,

    /// Token budget for each workspace file collection.
    #[arg(long)]
    max_tokens_files: Option<usize>,

    /// Characters kept per full-content file.
    #[arg(long)]
    max_file_size: Option<usize>,

    /// Provider requests allowed, continuations included.
    #[arg(long)]
    max_prompts: Option<u32>,

    #[arg(long, value_enum, default_value_t = ApiProvider::Openai)]
    api_provider: ApiProvider,

    /// Base URL (OpenAI) or resource endpoint (Azure).
    #[arg(long)]
    api_url: Option<String>,

    #[arg(long, value_enum, default_value_t = ApiAuth::Apikey)]
    api_auth: ApiAuth,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Bearer token for Azure token auth.
    #[arg(long, env = "AZURE_OPENAI_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[arg(long)]
    api_azure_version: Option<String>,

    /// TOML config file. Missing files mean defaults.
    #[arg(long, default_value = "cocoder.toml")]
    config: PathBuf,

    /// Conversation file restored on start and saved after every cycle.
    #[arg(long)]
    conversation: Option<PathBuf>,

    /// Write the conversation file back. `false` only restores it.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    conversation_save: bool,

    /// Don't exclude entries of `.gitignore` files.
    #[arg(long)]
    no_gitignore: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "cocoder=info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum ApiProvider {
    Openai,
    Azure,
}

#[derive(Clone, Copy, ValueEnum)]
enum ApiAuth {
    Apikey,
    Token,
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => {
            logging::init(&args.log_level);
            match cmd_run(args) {
                Ok(result) => {
                    print_result(&result);
                    exit_codes::OK
                }
                Err(err) => {
                    eprintln!("{err:#}");
                    exit_codes::for_error(&err)
                }
            }
        }
    };
    std::process::exit(code);
}

fn cmd_run(args: RunArgs) -> Result<RunResult> {
    let mut cfg = load_config(&args.config)?;
    apply_overrides(&mut cfg, &args);
    cfg.validate()?;
    if cfg.files.patterns.is_empty() && cfg.files.preview_patterns.is_empty() {
        return Err(TaskError::config("at least one of --files or --preview is required").into());
    }

    let workspace_dir = std::path::absolute(&args.workspace)
        .with_context(|| format!("resolve workspace {}", args.workspace.display()))?;
    let provider_config = ProviderSettings {
        kind: match args.api_provider {
            ApiProvider::Openai => ProviderKind::OpenAi,
            ApiProvider::Azure => ProviderKind::Azure,
        },
        auth: match args.api_auth {
            ApiAuth::Apikey => AuthMethod::ApiKey,
            ApiAuth::Token => AuthMethod::Token,
        },
        url: args.api_url.clone(),
        api_key: args.api_key.clone(),
        token: args.api_token.clone(),
        azure_api_version: args.api_azure_version.clone(),
    }
    .resolve(&cfg.completion.model)?;

    let provider = ChatCompletionsProvider::new(provider_config, cfg.completion.clone())?;
    let mut session = CompletionSession::new(provider, cfg.session);
    if let Some(path) = args.conversation.as_deref().filter(|p| p.exists()) {
        session.load_conversation(path)?;
        info!(
            path = %path.display(),
            turns = session.conversation().len(),
            "conversation restored"
        );
    }

    let task = WorkspaceTask {
        task: args.task,
        project_information: args.info,
        example: args.example,
        prompt_budget_tokens: cfg.session.max_tokens_per_request,
        options: TaskOptions {
            workspace_dir,
            output_dir: cfg.output_dir.clone(),
            files: cfg.files.clone(),
            requested_files: cfg.requested_files,
            conversation_path: args.conversation,
            save_conversation: args.conversation_save,
            model: cfg.completion.model.clone(),
        },
    };
    run_workspace_task(&mut session, &task, &cfg.costs)
}

fn apply_overrides(cfg: &mut CoderConfig, args: &RunArgs) {
    if let Some(model) = &args.model {
        cfg.completion.model.clone_from(model);
    }
    if let Some(output) = &args.output {
        cfg.output_dir.clone_from(output);
    }
    if let Some(value) = args.max_tokens_total {
        cfg.session.max_tokens_total = value;
    }
    if let Some(value) = args.max_tokens_per_request {
        cfg.session.max_tokens_per_request = value;
    }
    if let Some(value) = args.max_prompts {
        cfg.session.max_prompts = value;
    }
    if let Some(value) = args.max_tokens_files {
        cfg.files.max_tokens = value;
    }
    if let Some(value) = args.max_file_size {
        cfg.files.max_file_size = value;
    }
    if !args.files.is_empty() {
        cfg.files.patterns.clone_from(&args.files);
    }
    if !args.preview.is_empty() {
        cfg.files.preview_patterns.clone_from(&args.preview);
    }
    cfg.files
        .ignore_patterns
        .extend(args.files_ignore.iter().cloned());
    if args.no_gitignore {
        cfg.files.use_ignore_files = false;
    }
}

fn print_result(result: &RunResult) {
    println!("Generated files: {}", result.generated_files.len());
    for path in &result.generated_files {
        println!("  {}", path.display());
    }
    for note in &result.notes {
        println!("Note: {note}");
    }
    println!(
        "Prompts: {}, tokens: {} in / {} out",
        result.stats.prompt_counter,
        result.stats.session_input_tokens,
        result.stats.session_output_tokens
    );
}
