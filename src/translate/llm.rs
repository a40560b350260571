//! Chat-completions client used for poem translation.
//! Pooled reqwest client, request pacing, and a bounded retry budget for
//! 429 / 5xx / timeouts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CompletionBackend, TranslateError};

/// Spaces requests at least `interval` apart across all callers.
struct Pacer {
    next_slot: AsyncMutex<Instant>,
    interval: Duration,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            next_slot: AsyncMutex::new(Instant::now()),
            interval,
        }
    }

    async fn wait_turn(&self) {
        let mut slot = self.next_slot.lock().await;
        tokio::time::sleep_until(*slot).await;
        *slot = Instant::now() + self.interval;
    }
}

/// A failed attempt, reduced to what the retry budget cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retryable {
    RateLimited { retry_after: Option<Duration> },
    ServerError(u16),
    TimedOut,
}

impl Retryable {
    fn into_error(self) -> TranslateError {
        match self {
            Retryable::RateLimited { retry_after } => TranslateError::RateLimited {
                retry_after_ms: retry_after.map_or(0, |d| d.as_millis() as u64),
            },
            Retryable::ServerError(status) => {
                TranslateError::Api(format!("server error: {status}"))
            }
            Retryable::TimedOut => TranslateError::Timeout,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum NextStep {
    Wait(Duration),
    RetryNow,
    GiveUp,
}

/// 429: Retry-After or 1s/2s/4s, at most 3 retries.
/// 5xx: 500ms/1s, at most 2 retries.
/// Timeout: one immediate retry.
#[derive(Debug, Default)]
struct RetryBudget {
    rate_limited: u32,
    server_errors: u32,
    timed_out: bool,
}

impl RetryBudget {
    fn next(&mut self, failure: Retryable) -> NextStep {
        match failure {
            Retryable::RateLimited { retry_after } if self.rate_limited < 3 => {
                let wait =
                    retry_after.unwrap_or_else(|| Duration::from_secs(1 << self.rate_limited));
                self.rate_limited += 1;
                NextStep::Wait(wait)
            }
            Retryable::ServerError(_) if self.server_errors < 2 => {
                let wait = Duration::from_millis(500 << self.server_errors);
                self.server_errors += 1;
                NextStep::Wait(wait)
            }
            Retryable::TimedOut if !self.timed_out => {
                self.timed_out = true;
                NextStep::RetryNow
            }
            _ => NextStep::GiveUp,
        }
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub struct ChatCompletionClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    pacer: Pacer,
}

impl ChatCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, TranslateError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(TranslateError::InvalidInput("LLM API key is empty".into()));
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TranslateError::Api(e.to_string()))?;

        let base_url: String = base_url.into();
        Ok(Self {
            http,
            api_key,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            pacer: Pacer::new(Duration::from_millis(100)),
        })
    }

    async fn post_with_retry(
        &self,
        body: &serde_json::Value,
        cancel_token: &CancellationToken,
    ) -> Result<reqwest::Response, TranslateError> {
        let mut budget = RetryBudget::default();

        loop {
            let sent = tokio::select! {
                r = self.http.post(&self.endpoint).bearer_auth(&self.api_key).json(body).send() => r,
                _ = cancel_token.cancelled() => return Err(TranslateError::Cancelled),
            };

            let failure = match sent {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    Retryable::RateLimited {
                        retry_after: retry_after(&resp),
                    }
                }
                Ok(resp) if resp.status().is_server_error() => {
                    Retryable::ServerError(resp.status().as_u16())
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail: String = resp
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(200)
                        .collect();
                    return Err(TranslateError::Api(format!("status {status}: {detail}")));
                }
                Err(e) if e.is_timeout() => Retryable::TimedOut,
                Err(e) => return Err(TranslateError::Api(e.to_string())),
            };

            match budget.next(failure) {
                NextStep::GiveUp => return Err(failure.into_error()),
                NextStep::RetryNow => warn!(?failure, "completion retry"),
                NextStep::Wait(wait) => {
                    warn!(?failure, wait_ms = wait.as_millis() as u64, "completion retry");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel_token.cancelled() => return Err(TranslateError::Cancelled),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        cancel_token: &CancellationToken,
    ) -> Result<String, TranslateError> {
        tokio::select! {
            _ = self.pacer.wait_turn() => {}
            _ = cancel_token.cancelled() => return Err(TranslateError::Cancelled),
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "max_tokens": estimate_max_tokens(user),
            "temperature": 0.3
        });
        debug!(model = %self.model, prompt_chars = user.chars().count(), "completion request");

        let reply: CompletionReply = self
            .post_with_retry(&body, cancel_token)
            .await?
            .json()
            .await
            .map_err(|e| TranslateError::Api(format!("undecodable completion: {e}")))?;
        reply.first_content().ok_or(TranslateError::EmptyResponse)
    }
}

/// Poems expand in translation; leave headroom, capped at 1500.
fn estimate_max_tokens(prompt: &str) -> u32 {
    let input_tokens = prompt.chars().count() as f64 / 2.0;
    ((input_tokens * 1.5 + 64.0) as u32).clamp(256, 1500)
}

#[derive(Deserialize)]
struct CompletionReply {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl CompletionReply {
    fn first_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_tokens_are_clamped() {
        assert_eq!(estimate_max_tokens("short"), 256);
        assert_eq!(estimate_max_tokens(&"x".repeat(10_000)), 1500);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            ChatCompletionClient::new("https://llm.local", "  ", "m"),
            Err(TranslateError::InvalidInput(_))
        ));
    }

    #[test]
    fn reply_yields_first_non_blank_choice() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"POEM:\nx"}}]}"#;
        let reply: CompletionReply = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.first_content().as_deref(), Some("POEM:\nx"));

        let blank: CompletionReply =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert_eq!(blank.first_content(), None);
    }

    #[test]
    fn rate_limit_budget_backs_off_then_gives_up() {
        let mut budget = RetryBudget::default();
        let limited = Retryable::RateLimited { retry_after: None };
        assert_eq!(budget.next(limited), NextStep::Wait(Duration::from_secs(1)));
        assert_eq!(budget.next(limited), NextStep::Wait(Duration::from_secs(2)));
        assert_eq!(budget.next(limited), NextStep::Wait(Duration::from_secs(4)));
        assert_eq!(budget.next(limited), NextStep::GiveUp);
    }

    #[test]
    fn retry_after_header_overrides_backoff() {
        let mut budget = RetryBudget::default();
        let limited = Retryable::RateLimited {
            retry_after: Some(Duration::from_secs(9)),
        };
        assert_eq!(budget.next(limited), NextStep::Wait(Duration::from_secs(9)));
        assert_eq!(
            limited.into_error(),
            TranslateError::RateLimited { retry_after_ms: 9000 }
        );
    }

    #[test]
    fn server_errors_and_timeouts_have_separate_budgets() {
        let mut budget = RetryBudget::default();
        assert_eq!(
            budget.next(Retryable::ServerError(502)),
            NextStep::Wait(Duration::from_millis(500))
        );
        assert_eq!(budget.next(Retryable::TimedOut), NextStep::RetryNow);
        assert_eq!(
            budget.next(Retryable::ServerError(503)),
            NextStep::Wait(Duration::from_secs(1))
        );
        assert_eq!(budget.next(Retryable::ServerError(503)), NextStep::GiveUp);
        assert_eq!(budget.next(Retryable::TimedOut), NextStep::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_requests() {
        let pacer = Pacer::new(Duration::from_millis(100));
        let start = Instant::now();
        pacer.wait_turn().await;
        pacer.wait_turn().await;
        pacer.wait_turn().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
