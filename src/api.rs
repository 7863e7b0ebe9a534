//! LLM summarization with exponential backoff retry logic.
//!
//! The digest's analysis section comes from an OpenAI-compatible chat
//! completions endpoint (DeepSeek by default). The module is split the same way
//! as any decorator stack:
//!
//! - [`Summarizer`]: the seam the pipeline depends on
//! - [`ChatCompletionsClient`]: one HTTP call per request
//! - [`RetrySummarizer`]: wraps any [`Summarizer`] with backoff and jitter
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=250ms)
//! ```

use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_API_BASE: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Instructions sent as the system message with every corpus.
pub const SUMMARIZER_SYSTEM_PROMPT: &str = "\
You are a professional financial news analyst. Based on the news below, write a summary of at most 1500 words:
1. Identify the main industries and themes. Find the 3 sectors with the strongest gains over the last day, and 3 sectors that rose notably over the last 3 days after two flat weeks.
2. For each hot spot, give the catalyst, a recap and an outlook.
3. Keep the reasoning clear and focused, written for professional investors.";

/// Turns an analysis corpus into a summary.
pub trait Summarizer {
    async fn summarize(&self, text: &str) -> Result<String, Box<dyn Error>>;
}

/// Failures of a single chat completions call.
#[derive(Debug)]
pub enum ChatError {
    Http(reqwest::Error),
    Status { status: u16, body: String },
    EmptyContent,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Http(e) => write!(f, "http error: {e}"),
            ChatError::Status { status, body } => {
                write!(f, "api returned {status}: {}", truncate_for_log(body, 200))
            }
            ChatError::EmptyContent => write!(f, "api returned no message content"),
        }
    }
}

impl Error for ChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChatError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Http(e)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Trimmed content of the first choice, or [`ChatError::EmptyContent`].
fn first_content(response: ChatResponse) -> Result<String, ChatError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(ChatError::EmptyContent)
}

/// Client for `POST <base>/chat/completions`.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatCompletionsClient {
    /// Client for one OpenAI-compatible endpoint.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL up to and including the version, e.g. `https://api.deepseek.com/v1`
    /// * `api_key` - Bearer token
    /// * `model` - Model name sent with every request
    /// * `timeout` - Whole-request timeout
    pub fn new(
        api_base: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn request<'a>(&'a self, text: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SUMMARIZER_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        }
    }

    async fn complete(&self, text: &str) -> Result<String, ChatError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request(text))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }
        first_content(response.json::<ChatResponse>().await?)
    }
}

impl Summarizer for ChatCompletionsClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model, chars = text.chars().count()))]
    async fn summarize(&self, text: &str) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = self.complete(text).await;
        let dt = t0.elapsed();
        match &res {
            Ok(summary) => info!(
                elapsed_ms = dt.as_millis() as u64,
                chars = summary.chars().count(),
                "Summary received"
            ),
            Err(e) => warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "API call failed"),
        }
        Ok(res?)
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Summarizer`].
pub struct RetrySummarizer<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter_ms: u64,
}

impl<T: Summarizer> RetrySummarizer<T> {
    /// `max_retries` counts retries after the first attempt.
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter_ms: 250,
        }
    }

    #[cfg(test)]
    fn with_max_jitter(mut self, max_jitter_ms: u64) -> Self {
        self.max_jitter_ms = max_jitter_ms;
        self
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=self.max_jitter_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetrySummarizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySummarizer")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: Summarizer> Summarizer for RetrySummarizer<T> {
    #[instrument(level = "info", skip_all)]
    async fn summarize(&self, text: &str) -> Result<String, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.summarize(text).await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "summarize() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "summarize() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
