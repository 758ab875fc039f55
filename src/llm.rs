//! LLM access.
//!
//! The pipeline only needs `complete(prompt) -> text`. [`HttpLlmClient`]
//! speaks the OpenAI-compatible chat-completions protocol (DeepSeek,
//! OpenAI, local gateways); [`ScriptedLlmClient`] replays canned answers
//! for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, RetryPolicy};
use crate::error::LlmError;
use crate::retry::with_backoff;

/// Text-completion service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Completes a single-turn prompt.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct HttpLlmClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    temperature: f32,
    retry: RetryPolicy,
}

impl HttpLlmClient {
    /// Builds a client for `cfg`, retrying rate limits per `retry`.
    pub fn new(cfg: &LlmConfig, retry: RetryPolicy) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| LlmError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", cfg.endpoint.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            timeout: cfg.timeout,
            temperature: cfg.temperature,
            retry,
        })
    }

    async fn send_once(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stream: false,
        };

        let mut request = self.client.post(&self.url).json(&body).timeout(self.timeout);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout)
            } else {
                LlmError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse chat response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        with_backoff(&self.retry, "llm", move || self.send_once(prompt)).await
    }
}

/// Replays queued answers in order, then a fallback answer.
///
/// Records every prompt it receives.
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    /// Client with an empty script that fails every call.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Client that answers every prompt with `answer`.
    #[must_use]
    pub fn always(answer: impl Into<String>) -> Self {
        Self {
            fallback: Some(answer.into()),
            ..Self::new()
        }
    }

    /// Queues an answer.
    #[must_use]
    pub fn then(self, answer: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(answer.into()));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn then_fail(self, err: LlmError) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(Err(err));
        self
    }

    /// Number of `complete` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match next {
            Some(answer) => answer,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Request("script exhausted".to_string())),
        }
    }
}

/// Reads a yes/no verdict.
///
/// Accepts a bare `yes`/`no` (any case, optional trailing period) or a
/// `Decision: ...` line whose value, stripped of brackets and punctuation,
/// is exactly `yes` or `no`. Anything else, such as an echoed `YES/NO`
/// template, returns `None`.
#[must_use]
pub fn parse_yes_no(text: &str) -> Option<bool> {
    if let Some(verdict) = exact_verdict(text) {
        return Some(verdict);
    }

    let decision = text.lines().map(str::trim).find_map(|line| {
        let (head, rest) = line.split_once(':')?;
        head.trim().eq_ignore_ascii_case("decision").then_some(rest)
    })?;
    exact_verdict(decision.trim().trim_matches(|c: char| !c.is_ascii_alphanumeric()))
}

fn exact_verdict(text: &str) -> Option<bool> {
    let word = text.trim().trim_end_matches('.').trim();
    if word.eq_ignore_ascii_case("yes") {
        Some(true)
    } else if word.eq_ignore_ascii_case("no") {
        Some(false)
    } else {
        None
    }
}
