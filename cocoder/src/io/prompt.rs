//! Initial code-task prompt rendering.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::{debug, warn};

use crate::core::tokens::count_tokens;
use crate::error::TaskError;

const CODE_TASK_TEMPLATE: &str = include_str!("prompts/code_task.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section regex should be valid")
});

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 3] = ["example", "project", "preview"];

/// Everything the initial prompt is rendered from.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    /// What the model must do. Must not be blank.
    pub task: String,
    pub project_information: Option<String>,
    /// Collected full-content file blocks.
    pub full_files: String,
    /// Collected preview file blocks.
    pub preview_files: String,
    pub example: Option<String>,
    /// Advertised cap on files per `files-requested` answer.
    pub max_requested_files: usize,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Renders the code-task prompt within a token budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_tokens: usize,
}

impl PromptBuilder {
    pub fn new(budget_tokens: usize) -> Self {
        Self { budget_tokens }
    }

    /// Render the prompt, dropping example, project and preview sections (in
    /// that order) while it exceeds the budget.
    pub fn build(&self, input: &PromptInputs) -> Result<String> {
        let task = input.task.trim();
        if task.is_empty() {
            return Err(TaskError::config("task description must not be empty").into());
        }

        let mut env = Environment::new();
        env.add_template("code_task", CODE_TASK_TEMPLATE)
            .context("load code task template")?;
        let rendered = env
            .get_template("code_task")?
            .render(context! {
                task => task,
                project_information => non_blank(input.project_information.as_deref()),
                full_files => non_blank(Some(input.full_files.as_str())),
                preview_files => non_blank(Some(input.preview_files.as_str())),
                example => non_blank(input.example.as_deref()),
                max_requested_files => input.max_requested_files,
            })
            .context("render code task template")?;

        let mut sections = parse_sections(&rendered);
        self.apply_budget(&mut sections);
        Ok(render_sections(&sections))
    }

    fn apply_budget(&self, sections: &mut Vec<ParsedSection>) {
        let mut tokens = count_tokens(&render_sections(sections));
        for key in DROP_ORDER {
            if tokens <= self.budget_tokens {
                return;
            }
            if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
                let removed = sections.remove(idx);
                debug!(section = key, chars = removed.content.len(), "dropped section for budget");
                tokens = count_tokens(&render_sections(sections));
            }
        }
        if tokens > self.budget_tokens {
            warn!(
                tokens,
                budget = self.budget_tokens,
                "prompt exceeds budget after dropping sections"
            );
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
