//! Tafsir (literary explanation) service.
//!
//! `explain` and `explain_full` always resolve. The remote backend is tried
//! first; on failure, timeout, cancellation or offline mode the local
//! heuristic generator answers instead. At most one request per
//! `(poem id, language, depth)` is live: a newer request cancels the older
//! one, and only the newest may write the shared cache.

pub mod heuristic;
pub mod remote;
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cancellation::{KeyedCancellation, RequestTicket};
use crate::config::FeedConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::poem::{Language, Poem};

use remote::{coerce_explanation, coerce_tafsir, ExplainBackend};
use types::{CacheEntry, Depth, EntryState, Explanation, FullTafsir};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExplainError {
    #[error("explanation backend returned status {0}")]
    Status(u16),
    #[error("explanation transport error: {0}")]
    Transport(String),
    #[error("explanation reply malformed: {0}")]
    Malformed(String),
    #[error("explanation request timed out")]
    Timeout,
    #[error("explanation request cancelled")]
    Cancelled,
    #[error("offline")]
    Offline,
    #[error("poem has no text to explain")]
    EmptyPoem,
}

pub type ExplanationKey = (u64, Language);

/// One tier's cache: entries plus LRU-by-timestamp eviction.
struct TierCache<T> {
    entries: Mutex<HashMap<ExplanationKey, CacheEntry<T>>>,
}

impl<T: Clone> TierCache<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn ready(&self, key: &ExplanationKey) -> Option<T> {
        match self.entries.lock().get(key).map(|e| &e.state) {
            Some(EntryState::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn get(&self, key: &ExplanationKey) -> Option<CacheEntry<T>> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: ExplanationKey, state: EntryState<T>, seq: u64) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                state,
                timestamp: chrono::Utc::now(),
                seq,
            },
        );
    }

    /// Drops oldest settled entries until at most `cap` remain.
    fn evict_to(&self, cap: usize) -> usize {
        let mut entries = self.entries.lock();
        let mut evicted = 0;
        while entries.len() > cap {
            let oldest = entries
                .iter()
                .filter(|(_, e)| !e.is_loading())
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| *k);
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    fn drop_loading(&self) {
        self.entries.lock().retain(|_, e| !e.is_loading());
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

pub struct ExplanationService {
    backend: Option<Arc<dyn ExplainBackend>>,
    offline: AtomicBool,
    simple: TierCache<Explanation>,
    full: TierCache<FullTafsir>,
    inflight: KeyedCancellation<(ExplanationKey, Depth)>,
    seq: AtomicU64,
    timeout: Duration,
    cap: usize,
    revision: watch::Sender<u64>,
    metrics: Arc<MetricsRegistry>,
}

impl ExplanationService {
    /// `backend = None` runs permanently on the local tier.
    pub fn new(
        backend: Option<Arc<dyn ExplainBackend>>,
        metrics: Arc<MetricsRegistry>,
        config: &FeedConfig,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            backend,
            offline: AtomicBool::new(config.offline),
            simple: TierCache::new(),
            full: TierCache::new(),
            inflight: KeyedCancellation::new(),
            seq: AtomicU64::new(0),
            timeout: config.explain_timeout,
            cap: config.explanation_cache_cap.max(1),
            revision,
            metrics,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn is_offline(&self) -> bool {
        self.backend.is_none() || self.offline.load(Ordering::SeqCst)
    }

    /// Revision counter bumped on every cache transition.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn entry(&self, id: u64, language: Language) -> Option<CacheEntry<Explanation>> {
        self.simple.get(&(id, language))
    }

    pub fn full_entry(&self, id: u64, language: Language) -> Option<CacheEntry<FullTafsir>> {
        self.full.get(&(id, language))
    }

    pub fn len(&self) -> usize {
        self.simple.len() + self.full.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.inflight_len()
    }

    /// Simple tier: line-by-line breakdown plus general meaning.
    pub async fn explain(&self, poem: &Poem, language: Language, force_refresh: bool) -> Explanation {
        let local = || {
            if poem.lines().is_empty() {
                Err(ExplainError::EmptyPoem)
            } else {
                Ok(heuristic::explain(poem, language))
            }
        };
        match self
            .resolve(&self.simple, Depth::Simple, poem, language, force_refresh, |v| coerce_explanation(&v), local)
            .await
        {
            Ok(explanation) => explanation,
            Err(_) => heuristic::explain(poem, language),
        }
    }

    /// Comprehensive tier with cited couplets.
    pub async fn explain_full(&self, poem: &Poem, language: Language, force_refresh: bool) -> FullTafsir {
        let couplets = poem.couplet_count();
        let local = || {
            if couplets == 0 {
                Err(ExplainError::EmptyPoem)
            } else {
                Ok(heuristic::tafsir(poem, language))
            }
        };
        match self
            .resolve(&self.full, Depth::Full, poem, language, force_refresh, |v| coerce_tafsir(v, couplets), local)
            .await
        {
            Ok(tafsir) => tafsir,
            Err(_) => heuristic::tafsir(poem, language),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve<T, C, L>(
        &self,
        tier: &TierCache<T>,
        depth: Depth,
        poem: &Poem,
        language: Language,
        force_refresh: bool,
        coerce: C,
        local: L,
    ) -> Result<T, ExplainError>
    where
        T: Clone,
        C: FnOnce(Value) -> Result<T, ExplainError>,
        L: FnOnce() -> Result<T, ExplainError>,
    {
        let key = (poem.id, language);
        if !force_refresh {
            if let Some(hit) = tier.ready(&key) {
                debug!(id = poem.id, %language, ?depth, "explanation cache hit");
                return Ok(hit);
            }
        }

        let ticket = self.inflight.begin((key, depth));
        tier.set(key, EntryState::Loading, self.next_seq());
        self.bump();

        let span = self.metrics.span(metric_names::EXPLAIN);
        let remote = self
            .fetch_remote(poem, language, depth, &ticket)
            .await
            .and_then(coerce);
        let outcome = match remote {
            Ok(value) => Ok(value),
            Err(ExplainError::Cancelled) => {
                debug!(id = poem.id, %language, ?depth, "explanation superseded");
                local()
            }
            Err(e) => {
                if !matches!(e, ExplainError::Offline) {
                    warn!(id = poem.id, %language, ?depth, error = %e, "remote explanation failed, using local tier");
                }
                self.metrics.incr(metric_names::EXPLAIN_LOCAL_FALLBACK);
                local()
            }
        };
        span.finish();

        let state = match &outcome {
            Ok(value) => EntryState::Ready(value.clone()),
            Err(e) => EntryState::Failed(e.to_string()),
        };
        let seq = self.next_seq();
        let committed = self
            .inflight
            .finish_with(&(key, depth), &ticket, || tier.set(key, state, seq));
        if committed {
            let evicted = tier.evict_to(self.cap);
            if evicted > 0 {
                debug!(evicted, "explanation cache trimmed");
            }
            self.bump();
        } else {
            debug!(id = poem.id, %language, ?depth, "stale explanation result discarded");
        }
        outcome
    }

    async fn fetch_remote(
        &self,
        poem: &Poem,
        language: Language,
        depth: Depth,
        ticket: &RequestTicket,
    ) -> Result<Value, ExplainError> {
        if self.is_offline() {
            return Err(ExplainError::Offline);
        }
        let Some(backend) = self.backend.as_ref() else {
            return Err(ExplainError::Offline);
        };
        tokio::select! {
            r = tokio::time::timeout(self.timeout, backend.explain(poem, language, depth)) => {
                r.unwrap_or(Err(ExplainError::Timeout))
            }
            _ = ticket.token.cancelled() => Err(ExplainError::Cancelled),
        }
    }

    /// Cancels every in-flight request. Cancellation is expected, so nothing is logged above debug.
    pub fn cancel_all(&self) {
        let n = self.inflight.cancel_all();
        self.simple.drop_loading();
        self.full.drop_loading();
        if n > 0 {
            debug!(cancelled = n, "explanation requests cancelled");
            self.bump();
        }
    }

    /// Cancels everything and forgets every cached explanation.
    pub fn clear(&self) {
        self.inflight.cancel_all();
        self.simple.clear();
        self.full.clear();
        info!("explanation cache cleared");
        self.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    use crate::poem::{html_from_text, Poet};
    use types::ExplanationOrigin;

    /// Answers call N after `delays[N]`, with general meaning "call N".
    struct Sequenced {
        delays: Vec<Duration>,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ExplainBackend for Sequenced {
        async fn explain(&self, _: &Poem, _: Language, _: Depth) -> Result<Value, ExplainError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.get(n).copied().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            if self.fail {
                return Err(ExplainError::Status(500));
            }
            Ok(json!({
                "generalMeaning": format!("call {n}"),
                "mainThemes": "t",
                "imagerySymbols": "i",
                "lineByLine": []
            }))
        }
    }

    fn service(backend: Sequenced, config: FeedConfig) -> (Arc<ExplanationService>, Arc<Sequenced>) {
        let backend = Arc::new(backend);
        let svc = ExplanationService::new(
            Some(Arc::clone(&backend) as Arc<dyn ExplainBackend>),
            Arc::new(MetricsRegistry::new()),
            &config,
        );
        (Arc::new(svc), backend)
    }

    fn backend(delays: Vec<Duration>, fail: bool) -> Sequenced {
        Sequenced {
            delays,
            calls: AtomicUsize::new(0),
            fail,
        }
    }

    fn poem(id: u64) -> Poem {
        let text = "بشنو این نی چون شکایت می‌کند\nاز جدایی‌ها حکایت می‌کند";
        Poem {
            id,
            language: Language::Persian,
            title: "نی‌نامه".into(),
            text: text.into(),
            html_text: html_from_text(text),
            poet: Poet {
                id: None,
                name: "مولانا".into(),
                full_name: "مولانا".into(),
            },
        }
    }

    #[tokio::test]
    async fn cached_entry_is_returned_without_network() {
        let (svc, backend) = service(backend(vec![], false), FeedConfig::default());
        let first = svc.explain(&poem(1), Language::English, false).await;
        let second = svc.explain(&poem(1), Language::English, false).await;
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let forced = svc.explain(&poem(1), Language::English, true).await;
        assert_eq!(forced.general_meaning, "call 1");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_request_supersedes_older() {
        let (svc, _) = service(
            backend(vec![Duration::from_secs(10), Duration::from_secs(1)], false),
            FeedConfig::default(),
        );
        let p = poem(2);

        let first = {
            let svc = Arc::clone(&svc);
            let p = p.clone();
            tokio::spawn(async move { svc.explain(&p, Language::English, true).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = svc.explain(&p, Language::English, true).await;
        let first = first.await.unwrap();

        assert_eq!(second.general_meaning, "call 1");
        assert_eq!(first.origin, ExplanationOrigin::Local);
        let entry = svc.entry(2, Language::English).unwrap();
        assert_eq!(entry.state, EntryState::Ready(second));
        assert_eq!(svc.len(), 1);
        assert_eq!(svc.inflight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_local_tier() {
        let (svc, _) = service(backend(vec![Duration::from_secs(120)], false), FeedConfig::default());
        let e = svc.explain(&poem(3), Language::Persian, false).await;
        assert_eq!(e.origin, ExplanationOrigin::Local);
        assert_eq!(e.line_by_line.len(), 2);
        assert!(matches!(
            svc.entry(3, Language::Persian).unwrap().state,
            EntryState::Ready(_)
        ));
    }

    #[tokio::test]
    async fn offline_mode_skips_backend() {
        let config = FeedConfig {
            offline: true,
            ..FeedConfig::default()
        };
        let (svc, backend) = service(backend(vec![], false), config);
        let e = svc.explain(&poem(4), Language::English, false).await;
        assert_eq!(e.origin, ExplanationOrigin::Local);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn both_tiers_failing_marks_entry_failed() {
        let (svc, _) = service(backend(vec![], true), FeedConfig::default());
        let empty = Poem {
            text: "   \n ".into(),
            ..poem(5)
        };
        let e = svc.explain(&empty, Language::English, false).await;
        assert!(e.line_by_line.is_empty());
        assert!(!e.general_meaning.is_empty());
        assert!(matches!(
            svc.entry(5, Language::English).unwrap().state,
            EntryState::Failed(_)
        ));
    }

    #[tokio::test]
    async fn cache_is_bounded_by_cap() {
        let config = FeedConfig {
            explanation_cache_cap: 2,
            ..FeedConfig::default()
        };
        let (svc, _) = service(backend(vec![], false), config);
        for id in 1..=3 {
            svc.explain(&poem(id), Language::English, false).await;
        }
        assert_eq!(svc.len(), 2);
        assert!(svc.entry(1, Language::English).is_none());
        assert!(svc.entry(3, Language::English).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_is_silent_and_leaves_no_loading_entries() {
        let (svc, _) = service(backend(vec![Duration::from_secs(30)], false), FeedConfig::default());
        let handle = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.explain(&poem(6), Language::English, false).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(svc.entry(6, Language::English).unwrap().is_loading());

        svc.cancel_all();
        let e = handle.await.unwrap();
        assert_eq!(e.origin, ExplanationOrigin::Local);
        assert!(svc.entry(6, Language::English).is_none());
    }

    #[tokio::test]
    async fn full_tier_is_cached_separately() {
        let (svc, _) = service(backend(vec![], true), FeedConfig::default());
        let p = poem(7);
        let tafsir = svc.explain_full(&p, Language::English, false).await;
        assert!(tafsir.validate(p.couplet_count()).is_empty());
        assert!(svc.full_entry(7, Language::English).is_some());
        assert!(svc.entry(7, Language::English).is_none());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let (svc, _) = service(backend(vec![], false), FeedConfig::default());
        let rx = svc.subscribe();
        svc.explain(&poem(8), Language::English, false).await;
        // loading + ready
        assert_eq!(*rx.borrow(), 2);
    }
}
