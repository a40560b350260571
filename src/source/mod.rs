//! Upstream poem acquisition.
//!
//! The upstream is a fragile public API: empty bodies, non-JSON bodies and
//! non-2xx statuses are routine. `SourceClient` turns each attempt into a
//! `Result<Poem, FetchFailure>`, feeds the circuit breaker, and deduplicates
//! ids for the lifetime of a feed session.

pub mod fallback;
pub mod http;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::config::FeedConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::poem::{html_from_text, Language, Poem, Poet, UNKNOWN_POET, UNTITLED};

/// Why a single upstream attempt produced no poem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("circuit breaker open")]
    BreakerOpen,
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("upstream returned an empty body")]
    EmptyBody,
    #[error("upstream body is not valid JSON: {0}")]
    Malformed(String),
    #[error("upstream poem is missing id or text")]
    MissingFields,
    #[error("poem {0} already seen this session")]
    Duplicate(u64),
    #[error("upstream request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchFailure {
    /// Whether this outcome means the upstream misbehaved.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, FetchFailure::BreakerOpen | FetchFailure::Duplicate(_))
    }
}

/// Raw upstream reply before any interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// One `GET /poem/random`. Transport problems are `Err`; any HTTP reply is `Ok`.
    async fn random_poem(&self) -> Result<RawResponse, FetchFailure>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamPoem {
    id: Option<u64>,
    title: Option<String>,
    plain_text: Option<String>,
    text: Option<String>,
    html_text: Option<String>,
    poet: Option<UpstreamPoet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamPoet {
    id: Option<u64>,
    name: Option<String>,
    full_name: Option<String>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Interpret one upstream reply as a normalized poem in `language`.
pub fn parse_response(resp: RawResponse, language: Language) -> Result<Poem, FetchFailure> {
    if !(200..300).contains(&resp.status) {
        return Err(FetchFailure::Status(resp.status));
    }
    if resp.body.trim().is_empty() {
        return Err(FetchFailure::EmptyBody);
    }
    let raw: UpstreamPoem = serde_json::from_str(&resp.body)
        .map_err(|e| FetchFailure::Malformed(e.to_string()))?;

    let id = raw.id.ok_or(FetchFailure::MissingFields)?;
    let text = raw
        .plain_text
        .filter(|t| !t.trim().is_empty())
        .or(raw.text.filter(|t| !t.trim().is_empty()))
        .ok_or(FetchFailure::MissingFields)?;

    let (poet_id, name, full_name) = match raw.poet {
        Some(p) => (p.id, non_blank(p.name), non_blank(p.full_name)),
        None => (None, None, None),
    };
    let name = name.unwrap_or_else(|| UNKNOWN_POET.to_string());
    let full_name = full_name.unwrap_or_else(|| name.clone());
    let html_text = non_blank(raw.html_text).unwrap_or_else(|| html_from_text(&text));

    Ok(Poem {
        id,
        language,
        title: non_blank(raw.title).unwrap_or_else(|| UNTITLED.to_string()),
        text,
        html_text,
        poet: Poet {
            id: poet_id,
            name,
            full_name,
        },
    })
}

pub struct SourceClient {
    upstream: Arc<dyn UpstreamSource>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRegistry>,
    used_ids: Mutex<HashSet<u64>>,
    language: Language,
    timeout: Duration,
    fetch_delay: Duration,
    max_attempts: usize,
    abort_after_failures: usize,
}

impl SourceClient {
    pub fn new(
        upstream: Arc<dyn UpstreamSource>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsRegistry>,
        config: &FeedConfig,
    ) -> Self {
        Self {
            upstream,
            breaker,
            metrics,
            used_ids: Mutex::new(HashSet::new()),
            language: config.source_language,
            timeout: config.source_timeout,
            fetch_delay: config.source_fetch_delay,
            max_attempts: config.source_max_attempts,
            abort_after_failures: config.source_abort_after_failures,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// One upstream attempt, bounded by the per-call timeout.
    pub async fn fetch_one(&self) -> Result<Poem, FetchFailure> {
        if !self.breaker.should_attempt() {
            return Err(FetchFailure::BreakerOpen);
        }

        let span = self.metrics.span(metric_names::SOURCE_FETCH);
        let outcome = match tokio::time::timeout(self.timeout, self.upstream.random_poem()).await
        {
            Ok(Ok(resp)) => parse_response(resp, self.language),
            Ok(Err(failure)) => Err(failure),
            Err(_) => Err(FetchFailure::Timeout),
        };
        span.finish();

        match outcome {
            Ok(poem) => {
                self.breaker.record_success();
                if !self.used_ids.lock().insert(poem.id) {
                    return Err(FetchFailure::Duplicate(poem.id));
                }
                Ok(poem)
            }
            Err(failure) => {
                if failure.counts_against_breaker() && self.breaker.record_failure() {
                    self.metrics.incr(metric_names::BREAKER_TRIPS);
                    warn!(error = %failure, "upstream failure threshold reached");
                }
                Err(failure)
            }
        }
    }

    /// Sequentially gathers up to `count` fresh poems. Never fails; returns
    /// whatever it managed to collect.
    pub async fn fetch_many(&self, count: usize) -> Vec<Poem> {
        self.fetch_many_cancellable(count, &CancellationToken::new())
            .await
    }

    /// `fetch_many` that stops as soon as `cancel_token` fires, dropping the
    /// attempt in flight. Poems collected before that are still returned.
    pub async fn fetch_many_cancellable(
        &self,
        count: usize,
        cancel_token: &CancellationToken,
    ) -> Vec<Poem> {
        let attempts = (count * 2).min(self.max_attempts);
        let mut poems = Vec::with_capacity(count);
        let mut consecutive_failures = 0usize;

        for attempt in 0..attempts {
            if poems.len() >= count {
                break;
            }
            let delay = if attempt > 0 { self.fetch_delay } else { Duration::ZERO };
            let outcome = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!(collected = poems.len(), "batch cancelled");
                    break;
                }
                outcome = async {
                    tokio::time::sleep(delay).await;
                    self.fetch_one().await
                } => outcome,
            };
            match outcome {
                Ok(poem) => {
                    consecutive_failures = 0;
                    poems.push(poem);
                }
                Err(FetchFailure::BreakerOpen) => {
                    debug!(collected = poems.len(), "breaker open, stopping batch");
                    break;
                }
                Err(failure) => {
                    consecutive_failures += 1;
                    debug!(attempt, error = %failure, "upstream attempt failed");
                    if poems.is_empty() && consecutive_failures >= self.abort_after_failures {
                        warn!(
                            attempts = attempt + 1,
                            "aborting batch after repeated upstream failures"
                        );
                        break;
                    }
                }
            }
        }

        debug!(requested = count, collected = poems.len(), "fetch_many done");
        poems
    }

    /// Marks ids as seen so later fetches skip them (e.g. poems restored from cache).
    pub fn mark_used<I: IntoIterator<Item = u64>>(&self, ids: I) {
        self.used_ids.lock().extend(ids);
    }

    pub fn clear_used_ids(&self) {
        self.used_ids.lock().clear();
    }

    pub fn used_ids_len(&self) -> usize {
        self.used_ids.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        replies: Mutex<VecDeque<Result<RawResponse, FetchFailure>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<RawResponse, FetchFailure>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl UpstreamSource for Scripted {
        async fn random_poem(&self) -> Result<RawResponse, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(FetchFailure::Transport("exhausted".into())))
        }
    }

    fn ok(body: &str) -> Result<RawResponse, FetchFailure> {
        Ok(RawResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn poem_body(id: u64) -> String {
        format!(r#"{{"id":{id},"title":"t{id}","plainText":"a\nb","poet":{{"name":"p"}}}}"#)
    }

    fn client(upstream: Arc<Scripted>) -> SourceClient {
        let config = FeedConfig::default();
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown,
        ));
        SourceClient::new(upstream, breaker, Arc::new(MetricsRegistry::new()), &config)
    }

    #[test]
    fn parse_normalizes_missing_fields() {
        let poem = parse_response(
            RawResponse {
                status: 200,
                body: r#"{"id":42,"plainText":"line one\nline two","poet":{"name":"X"}}"#.into(),
            },
            Language::Persian,
        )
        .unwrap();
        assert_eq!(poem.id, 42);
        assert_eq!(poem.title, UNTITLED);
        assert_eq!(poem.text, "line one\nline two");
        assert_eq!(poem.html_text, "line one<br>line two");
        assert_eq!(poem.poet.name, "X");
        assert_eq!(poem.poet.full_name, "X");
    }

    #[test]
    fn parse_uses_sentinel_for_missing_poet() {
        let poem = parse_response(
            RawResponse {
                status: 200,
                body: r#"{"id":1,"text":"x"}"#.into(),
            },
            Language::Persian,
        )
        .unwrap();
        assert_eq!(poem.poet.name, UNKNOWN_POET);
    }

    #[test]
    fn parse_rejects_routine_bad_replies() {
        let parse = |status, body: &str| {
            parse_response(
                RawResponse {
                    status,
                    body: body.into(),
                },
                Language::Persian,
            )
        };
        assert_eq!(parse(503, "{}"), Err(FetchFailure::Status(503)));
        assert_eq!(parse(200, "  "), Err(FetchFailure::EmptyBody));
        assert!(matches!(parse(200, "<html>"), Err(FetchFailure::Malformed(_))));
        assert_eq!(parse(200, r#"{"title":"x","text":"y"}"#), Err(FetchFailure::MissingFields));
        assert_eq!(parse(200, r#"{"id":3,"plainText":""}"#), Err(FetchFailure::MissingFields));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_feed_the_breaker() {
        let upstream = Scripted::new(vec![
            Err(FetchFailure::Transport("reset".into())),
            ok(""),
            ok(&poem_body(1)),
        ]);
        let source = client(upstream);
        assert!(source.fetch_one().await.is_err());
        assert!(source.fetch_one().await.is_err());
        assert_eq!(source.breaker().snapshot().consecutive_failures, 2);
        assert!(source.fetch_one().await.is_ok());
        assert_eq!(source.breaker().snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_many_skips_duplicates() {
        let upstream = Scripted::new(vec![
            ok(&poem_body(1)),
            ok(&poem_body(1)),
            ok(&poem_body(2)),
            ok(&poem_body(2)),
            ok(&poem_body(3)),
        ]);
        let source = client(Arc::clone(&upstream));
        let poems = source.fetch_many(3).await;
        let ids: Vec<u64> = poems.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 5);
        assert_eq!(source.used_ids_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_batch_stops_calling_upstream() {
        let upstream = Scripted::new((1..=10).map(|id| ok(&poem_body(id))).collect());
        let source = Arc::new(client(Arc::clone(&upstream)));
        let token = CancellationToken::new();

        let batch = {
            let source = Arc::clone(&source);
            let token = token.clone();
            tokio::spawn(async move { source.fetch_many_cancellable(10, &token).await })
        };
        // first attempt at t=0, then one every 200ms
        tokio::time::sleep(Duration::from_millis(450)).await;
        token.cancel();
        let poems = batch.await.unwrap();

        assert_eq!(poems.len(), 3);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
        assert_eq!(source.used_ids_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_many_aborts_after_consecutive_failures() {
        let upstream = Scripted::new(vec![]);
        let source = client(Arc::clone(&upstream));
        let poems = source.fetch_many(10).await;
        assert!(poems.is_empty());
        // The breaker opens after five failures, which ends the batch first.
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 5);
        assert!(!source.breaker().should_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_many_gives_up_after_eight_straight_failures() {
        let config = FeedConfig {
            breaker_threshold: 100,
            ..FeedConfig::default()
        };
        let upstream = Scripted::new(vec![]);
        let breaker = Arc::new(CircuitBreaker::new(100, config.breaker_cooldown));
        let source = SourceClient::new(
            Arc::clone(&upstream) as Arc<dyn UpstreamSource>,
            breaker,
            Arc::new(MetricsRegistry::new()),
            &config,
        );
        assert!(source.fetch_many(10).await.is_empty());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_many_respects_attempt_cap() {
        let mut replies = vec![ok(&poem_body(1))];
        replies.extend((0..10).map(|_| ok(&poem_body(1))));
        let upstream = Scripted::new(replies);
        let source = client(Arc::clone(&upstream));
        let poems = source.fetch_many(2).await;
        assert_eq!(poems.len(), 1);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 4);
    }

    struct Hanging;

    #[async_trait]
    impl UpstreamSource for Hanging {
        async fn random_poem(&self) -> Result<RawResponse, FetchFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(FetchFailure::Transport("unreachable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_is_a_failure() {
        let config = FeedConfig::default();
        let breaker = Arc::new(CircuitBreaker::new(5, config.breaker_cooldown));
        let source = SourceClient::new(
            Arc::new(Hanging),
            Arc::clone(&breaker),
            Arc::new(MetricsRegistry::new()),
            &config,
        );
        assert_eq!(source.fetch_one().await, Err(FetchFailure::Timeout));
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }
}
