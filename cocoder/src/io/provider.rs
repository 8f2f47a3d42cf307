//! Model provider abstraction.
//!
//! The [`CompletionProvider`] trait decouples the completion session from the
//! transport. [`ChatCompletionsProvider`] talks to an OpenAI-compatible
//! `/chat/completions` endpoint (OpenAI or Azure); tests use scripted providers
//! that return predetermined completions.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::Turn;
use crate::error::{ProviderError, TaskError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Normal completion.
    Stop,
    /// Cut short by the output length limit; the session asks for more.
    Length,
}

/// Provider-reported token accounting for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// One provider reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

/// Abstraction over model backends.
pub trait CompletionProvider {
    /// Submit the whole conversation and return the next assistant reply.
    fn create_completion(&self, turns: &[Turn]) -> Result<Completion>;
}

impl<P: CompletionProvider + ?Sized> CompletionProvider for &P {
    fn create_completion(&self, turns: &[Turn]) -> Result<Completion> {
        (**self).create_completion(turns)
    }
}

/// Sampling settings sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model name, or deployment name for Azure.
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: i64,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            top_p: 0.95,
            seed: 0,
            max_output_tokens: 4096,
            request_timeout_secs: 300,
        }
    }
}

/// Endpoint and credentials, one variant per provider kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    OpenAi {
        base_url: String,
        api_key: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
        auth: AzureAuth,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AzureAuth {
    ApiKey(String),
    BearerToken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Azure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    ApiKey,
    Token,
}

/// Unvalidated provider flags as they arrive from the command line.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub auth: AuthMethod,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub azure_api_version: Option<String>,
}

impl ProviderSettings {
    /// Validate the flag combination once and produce a typed config.
    pub fn resolve(self, model: &str) -> Result<ProviderConfig, TaskError> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        match self.kind {
            ProviderKind::OpenAi => {
                if self.auth == AuthMethod::Token {
                    return Err(TaskError::config(
                        "token auth is only supported with the azure provider",
                    ));
                }
                let api_key = non_empty(self.api_key).ok_or_else(|| {
                    TaskError::config("api key is required when provider is \"openai\"")
                })?;
                Ok(ProviderConfig::OpenAi {
                    base_url: non_empty(self.url).unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                    api_key,
                })
            }
            ProviderKind::Azure => {
                let endpoint = non_empty(self.url).ok_or_else(|| {
                    TaskError::config("api url is required when provider is \"azure\"")
                })?;
                let auth = match self.auth {
                    AuthMethod::ApiKey => AzureAuth::ApiKey(non_empty(self.api_key).ok_or_else(
                        || TaskError::config("api key is required when auth is \"apikey\""),
                    )?),
                    AuthMethod::Token => AzureAuth::BearerToken(non_empty(self.token).ok_or_else(
                        || TaskError::config("api token is required when auth is \"token\""),
                    )?),
                };
                if model.trim().is_empty() {
                    return Err(TaskError::config(
                        "model (deployment name) is required when provider is \"azure\"",
                    ));
                }
                Ok(ProviderConfig::Azure {
                    endpoint,
                    deployment: model.to_string(),
                    api_version: non_empty(self.azure_api_version)
                        .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
                    auth,
                })
            }
        }
    }
}

impl ProviderConfig {
    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        match self {
            ProviderConfig::OpenAi { base_url, .. } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            ProviderConfig::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    temperature: f32,
    top_p: f32,
    seed: i64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

/// Blocking client for OpenAI-compatible chat-completions endpoints.
pub struct ChatCompletionsProvider {
    client: Client,
    config: ProviderConfig,
    model: ModelConfig,
}

impl ChatCompletionsProvider {
    pub fn new(config: ProviderConfig, model: ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(model.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            config,
            model,
        })
    }
}

impl CompletionProvider for ChatCompletionsProvider {
    #[instrument(skip_all, fields(model = %self.model.model, turns = turns.len()))]
    fn create_completion(&self, turns: &[Turn]) -> Result<Completion> {
        let url = self.config.completions_url();
        let body = ChatRequest {
            model: &self.model.model,
            messages: turns,
            temperature: self.model.temperature,
            top_p: self.model.top_p,
            seed: self.model.seed,
            max_tokens: self.model.max_output_tokens,
            stream: false,
        };

        let request = self.client.post(&url).json(&body);
        let request = match &self.config {
            ProviderConfig::OpenAi { api_key, .. } => request.bearer_auth(api_key),
            ProviderConfig::Azure {
                auth: AzureAuth::ApiKey(key),
                ..
            } => request.header("api-key", key),
            ProviderConfig::Azure {
                auth: AzureAuth::BearerToken(token),
                ..
            } => request.bearer_auth(token),
        };

        let response = request
            .send()
            .with_context(|| format!("send completion request to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "completion request failed");
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        let parsed: ChatResponse = response.json().context("parse completion response")?;
        debug!(choices = parsed.choices.len(), "completion received");
        into_completion(parsed)
    }
}

fn into_completion(response: ChatResponse) -> Result<Completion> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(ProviderError::NoChoices)?;
    let finish_reason = match choice.finish_reason.as_deref() {
        Some("length") => FinishReason::Length,
        Some("stop") | None => FinishReason::Stop,
        Some(other) => {
            warn!(finish_reason = other, "treating finish reason as stop");
            FinishReason::Stop
        }
    };
    Ok(Completion {
        content: choice.message.content,
        finish_reason,
        usage: response.usage.map(|usage| Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }),
    })
}
