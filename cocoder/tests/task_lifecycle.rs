//! Task-level tests for the prompt/response loop.
//!
//! These drive `run_prompt_loop` and `run_workspace_task` against a scripted
//! provider and a temporary workspace, checking the prompts sent back to the
//! model and the files and notes left behind.

use std::fs;

use cocoder::core::budget::SessionLimits;
use cocoder::core::cost::CostTable;
use cocoder::core::types::{Role, Turn};
use cocoder::error::{BudgetExceeded, TaskError};
use cocoder::io::config::{FilesConfig, RequestedFilesConfig};
use cocoder::io::session::CompletionSession;
use cocoder::task::{
    CONTINUE_GENERATION_PROMPT, PROCEED_WITHOUT_FILES_PROMPT, TaskOptions, WorkspaceTask,
    run_prompt_loop, run_workspace_task,
};
use cocoder::test_support::{
    ScriptedProvider, TestWorkspace, files_generated, files_requested, notes, reply, with_outcome,
};

fn options(ws: &TestWorkspace) -> TaskOptions {
    TaskOptions {
        workspace_dir: ws.path().to_path_buf(),
        output_dir: ws.path().join("out"),
        files: FilesConfig {
            use_ignore_files: false,
            ..FilesConfig::default()
        },
        requested_files: RequestedFilesConfig::default(),
        conversation_path: None,
        save_conversation: true,
        model: "gpt-4o".to_string(),
    }
}

fn limits() -> SessionLimits {
    SessionLimits {
        max_prompts: 10,
        max_tokens_per_request: 100_000,
        max_tokens_total: 1_000_000,
    }
}

/// Verifies a request naming an unknown and a known file is answered with the
/// known file only.
#[test]
fn requested_files_serve_only_what_exists() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write("src/known.rs", "pub fn known() {}").expect("write");
    let provider = ScriptedProvider::new(vec![
        reply(&files_requested(&["src/missing.rs", "/src/known.rs"])),
        reply(&notes(&["done"])),
    ]);
    let mut session = CompletionSession::new(&provider, limits());

    let result = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .expect("run");

    let prompts = provider.user_prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[1], "File src/known.rs: ```pub fn known() {}```\n\n");
    assert_eq!(result.requested_files_served, 1);
    assert_eq!(result.file_request_rounds, 1);
    assert_eq!(result.notes, vec!["done"]);
}

/// Verifies the literal fallback prompt when no requested file resolves.
#[test]
fn unresolved_requests_fall_back() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(vec![
        reply(&files_requested(&["nope.rs"])),
        reply(&notes(&["ok"])),
    ]);
    let mut session = CompletionSession::new(&provider, limits());

    let result = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .expect("run");

    assert_eq!(provider.user_prompts()[1], PROCEED_WITHOUT_FILES_PROMPT);
    assert_eq!(result.requested_files_served, 0);
}

/// Verifies the round cap: once reached, further requests get the fallback.
#[test]
fn file_request_rounds_are_capped() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write("a.rs", "fn a() {}").expect("write");
    let provider = ScriptedProvider::new(vec![
        reply(&files_requested(&["a.rs"])),
        reply(&files_requested(&["a.rs"])),
        reply(&notes(&["finished"])),
    ]);
    let mut session = CompletionSession::new(&provider, limits());
    let mut opts = options(&ws);
    opts.requested_files.max_rounds = 1;

    let result = run_prompt_loop(&mut session, "start", &opts, &CostTable::default())
        .expect("run");

    let prompts = provider.user_prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].starts_with("File a.rs:"));
    assert_eq!(prompts[2], PROCEED_WITHOUT_FILES_PROMPT);
    assert_eq!(result.file_request_rounds, 1);
}

/// Verifies the served-file budget spans the whole task.
#[test]
fn requested_file_budget_is_shared_across_rounds() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write("a.rs", "fn a() {}").expect("write");
    ws.write("b.rs", "fn b() {}").expect("write");
    ws.write("c.rs", "fn c() {}").expect("write");
    let provider = ScriptedProvider::new(vec![
        reply(&files_requested(&["a.rs", "b.rs"])),
        reply(&files_requested(&["c.rs"])),
        reply(&notes(&["finished"])),
    ]);
    let mut session = CompletionSession::new(&provider, limits());
    let mut opts = options(&ws);
    opts.requested_files.max_files = 2;

    let result = run_prompt_loop(&mut session, "start", &opts, &CostTable::default())
        .expect("run");

    let prompts = provider.user_prompts();
    assert!(prompts[1].contains("File a.rs:"));
    assert!(prompts[1].contains("File b.rs:"));
    assert_eq!(prompts[2], PROCEED_WITHOUT_FILES_PROMPT);
    assert_eq!(result.requested_files_served, 2);
}

/// Verifies `hasMoreToGenerate` triggers a second call and both rounds' files
/// are written.
#[test]
fn more_to_generate_continues_until_done() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(vec![
        reply(&files_generated(&[("src/a.rs", "fn a() {}\n")], true)),
        reply(&files_generated(&[("src/b.rs", "fn b() {}\n")], false)),
    ]);
    let mut session = CompletionSession::new(&provider, limits());

    let result = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .expect("run");

    assert_eq!(provider.requests().len(), 2);
    assert_eq!(provider.user_prompts()[1], CONTINUE_GENERATION_PROMPT);
    assert_eq!(
        result.generated_files,
        vec![
            ws.path().join("out").join("src/a.rs"),
            ws.path().join("out").join("src/b.rs"),
        ]
    );
    assert_eq!(ws.read("out/src/a.rs").expect("a"), "fn a() {}\n");
    assert_eq!(ws.read("out/src/b.rs").expect("b"), "fn b() {}\n");
    assert_eq!(result.stats.prompt_counter, 2);
    assert_eq!(result.stats.session_input_tokens, 20);
}

/// Verifies undecodable text ends the task with exactly one note.
#[test]
fn undecodable_response_becomes_single_note() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(vec![reply("I cannot help with that.")]);
    let mut session = CompletionSession::new(&provider, limits());

    let result = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .expect("run");

    assert_eq!(result.notes, vec!["Model response: I cannot help with that."]);
    assert!(result.generated_files.is_empty());
}

#[test]
fn unknown_outcome_is_fatal() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(vec![reply(&with_outcome(
        "code-generated",
        &[("a.rs", "x")],
    ))]);
    let mut session = CompletionSession::new(&provider, limits());

    let err = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<TaskError>(),
        Some(&TaskError::UnexpectedOutcome("code-generated".to_string()))
    );
}

#[test]
fn empty_generated_file_is_fatal() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(vec![reply(&files_generated(
        &[("a.rs", "fn a() {}"), ("b.rs", "")],
        false,
    ))]);
    let mut session = CompletionSession::new(&provider, limits());

    let err = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<TaskError>(),
        Some(&TaskError::EmptyGeneratedFile {
            filename: "b.rs".to_string()
        })
    );
    // Earlier files in the same response stay written.
    assert!(ws.path().join("out/a.rs").is_file());
}

#[test]
fn escaping_output_path_is_fatal() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(vec![reply(&files_generated(
        &[("../escape.rs", "fn x() {}")],
        false,
    ))]);
    let mut session = CompletionSession::new(&provider, limits());

    let err = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<TaskError>(),
        Some(TaskError::UnsafeOutputPath { .. })
    ));
    assert!(!ws.path().join("escape.rs").exists());
}

/// Verifies a budget failure mid-task keeps the files already written.
#[test]
fn budget_exhaustion_keeps_partial_output() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(vec![
        reply(&files_generated(&[("a.rs", "fn a() {}")], true)),
        reply(&files_generated(&[("b.rs", "fn b() {}")], false)),
    ]);
    let mut session = CompletionSession::new(
        &provider,
        SessionLimits {
            max_prompts: 1,
            ..limits()
        },
    );

    let err = run_prompt_loop(&mut session, "start", &options(&ws), &CostTable::default())
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<BudgetExceeded>(),
        Some(&BudgetExceeded::TooManyPrompts { sent: 2, max: 1 })
    );
    assert!(ws.path().join("out/a.rs").is_file());
    assert_eq!(provider.requests().len(), 1);
}

/// Verifies the conversation file is rewritten after every cycle and can seed
/// a new session.
#[test]
fn conversation_is_saved_after_each_cycle() {
    let ws = TestWorkspace::new().expect("workspace");
    let conversation = ws.path().join("state/conversation.json");
    let provider = ScriptedProvider::new(vec![
        reply(&files_requested(&["missing.rs"])),
        reply(&notes(&["done"])),
    ]);
    let mut session = CompletionSession::new(&provider, limits());
    let mut opts = options(&ws);
    opts.conversation_path = Some(conversation.clone());

    run_prompt_loop(&mut session, "start", &opts, &CostTable::default()).expect("run");

    let saved: Vec<Turn> =
        serde_json::from_str(&fs::read_to_string(&conversation).expect("read")).expect("json");
    assert_eq!(saved.len(), 5);
    assert_eq!(saved[0].role, Role::System);
    assert_eq!(saved[3].content, PROCEED_WITHOUT_FILES_PROMPT);

    let resumed_provider = ScriptedProvider::new(vec![reply(&notes(&["again"]))]);
    let mut resumed = CompletionSession::new(&resumed_provider, limits());
    resumed.load_conversation(&conversation).expect("load");
    run_prompt_loop(&mut resumed, "continue", &opts, &CostTable::default()).expect("resume");
    assert_eq!(resumed_provider.requests()[0].len(), 6);
}

/// Verifies a restored conversation is left untouched when saving is off.
#[test]
fn conversation_is_only_read_when_saving_is_disabled() {
    let ws = TestWorkspace::new().expect("workspace");
    let conversation = ws.path().join("conversation.json");
    let earlier = vec![
        Turn::system("You are a coder."),
        Turn::user("first task"),
        Turn::assistant("first answer"),
    ];
    let original = serde_json::to_string_pretty(&earlier).expect("json");
    fs::write(&conversation, &original).expect("write");

    let provider = ScriptedProvider::new(vec![reply(&notes(&["done"]))]);
    let mut session = CompletionSession::new(&provider, limits());
    session.load_conversation(&conversation).expect("load");
    let mut opts = options(&ws);
    opts.conversation_path = Some(conversation.clone());
    opts.save_conversation = false;

    run_prompt_loop(&mut session, "second task", &opts, &CostTable::default()).expect("run");

    assert_eq!(provider.requests()[0].len(), 4);
    assert_eq!(session.conversation().len(), 5);
    assert_eq!(fs::read_to_string(&conversation).expect("read"), original);
}

/// Verifies the initial prompt carries the task and the collected files.
#[test]
fn workspace_task_builds_prompt_from_files() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write("src/lib.rs", "pub fn lib() {}").expect("write");
    ws.write("docs/guide.md", &"guide text ".repeat(200)).expect("write");
    ws.write("node_modules/dep/index.rs", "vendored").expect("write");
    let provider = ScriptedProvider::new(vec![reply(&files_generated(
        &[("src/health.rs", "pub fn health() {}")],
        false,
    ))]);
    let mut session = CompletionSession::new(&provider, limits());
    let mut opts = options(&ws);
    opts.files.patterns = vec!["**/*.rs".to_string()];
    opts.files.preview_patterns = vec!["docs/*.md".to_string()];
    opts.files.preview_file_size = 20;

    let task = WorkspaceTask {
        task: "Add a health check".to_string(),
        project_information: Some("A tiny library".to_string()),
        example: None,
        prompt_budget_tokens: 100_000,
        options: opts,
    };
    let result = run_workspace_task(&mut session, &task, &CostTable::default()).expect("run");

    let prompt = &provider.user_prompts()[0];
    assert!(prompt.contains("Add a health check"));
    assert!(prompt.contains("A tiny library"));
    assert!(prompt.contains("File src/lib.rs: ```pub fn lib() {}```"));
    let preview = &"guide text ".repeat(2)[..20];
    assert!(prompt.contains(&format!("File docs/guide.md: ```{preview}```")));
    assert!(!prompt.contains("vendored"));
    assert_eq!(ws.read("out/src/health.rs").expect("read"), "pub fn health() {}");
    assert_eq!(result.generated_files.len(), 1);
}

#[test]
fn workspace_task_rejects_blank_task() {
    let ws = TestWorkspace::new().expect("workspace");
    let provider = ScriptedProvider::new(Vec::new());
    let mut session = CompletionSession::new(&provider, limits());
    let task = WorkspaceTask {
        task: String::new(),
        project_information: None,
        example: None,
        prompt_budget_tokens: 100_000,
        options: options(&ws),
    };

    let err = run_workspace_task(&mut session, &task, &CostTable::default()).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<TaskError>(),
        Some(TaskError::Configuration(_))
    ));
    assert!(provider.requests().is_empty());
}
