//! Poem feed controller.
//!
//! Owns one feed session at a time: the poems on screen, the source-language
//! originals they came from, the exhausted flag and the degraded flag. Every
//! async operation runs under a `GenerationGuard`; refresh, teardown and
//! language switches advance the generation so late results from a previous
//! session are dropped instead of resurrected.

pub mod state;


use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cancellation::{GenerationGuard, TaskGeneration};
use crate::config::FeedConfig;
use crate::explain::types::{Explanation, FullTafsir};
use crate::explain::ExplanationService;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::poem::{Language, Poem};
use crate::source::fallback::fallback_poems;
use crate::source::SourceClient;
use crate::store::{load_ui_language, save_ui_language, KeyValueStore};
use crate::translate::{TranslateError, TranslationService};

use state::Session;
pub use state::{FeedSnapshot, FeedState};

/// Collaborators the controller orchestrates.
pub struct FeedServices {
    pub source: Arc<SourceClient>,
    /// `None` disables translation; other languages then show originals.
    pub translator: Option<Arc<TranslationService>>,
    pub explainer: Arc<ExplanationService>,
    pub store: Arc<dyn KeyValueStore>,
    pub metrics: Arc<MetricsRegistry>,
}

struct Inner {
    source: Arc<SourceClient>,
    translator: Option<Arc<TranslationService>>,
    explainer: Arc<ExplanationService>,
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<MetricsRegistry>,
    config: FeedConfig,
    generation: TaskGeneration,
    session: Mutex<Session>,
    reveal_started: Mutex<Option<Instant>>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
}

/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct FeedController {
    inner: Arc<Inner>,
}

impl FeedController {
    /// The starting language is the stored UI preference, else the configured one.
    pub fn new(services: FeedServices, config: FeedConfig) -> Self {
        let language =
            load_ui_language(services.store.as_ref()).unwrap_or(config.initial_language);
        let session = Session::new(language);
        let generation = TaskGeneration::new();
        let (snapshot_tx, _) = watch::channel(session.snapshot(generation.current_generation()));
        Self {
            inner: Arc::new(Inner {
                source: services.source,
                translator: services.translator,
                explainer: services.explainer,
                store: services.store,
                metrics: services.metrics,
                config,
                generation,
                session: Mutex::new(session),
                reveal_started: Mutex::new(None),
                snapshot_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn explainer(&self) -> &Arc<ExplanationService> {
        &self.inner.explainer
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }

    fn language(&self) -> Language {
        self.inner.session.lock().language
    }

    /// Applies `f` to the session and publishes, unless `guard` is stale.
    fn commit<R>(&self, guard: &GenerationGuard, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut session = self.inner.session.lock();
        if !guard.is_current() {
            debug!(generation = guard.my_generation(), "stale feed update dropped");
            return None;
        }
        let before = session.poems.len();
        let out = f(&mut session);
        if before == 0 && !session.poems.is_empty() {
            if let Some(started) = self.inner.reveal_started.lock().take() {
                self.inner.metrics.record(
                    metric_names::FIRST_REVEAL,
                    started.elapsed().as_secs_f64() * 1_000_000.0,
                );
            }
        }
        self.inner
            .snapshot_tx
            .send_replace(session.snapshot(guard.my_generation()));
        Some(out)
    }

    /// Starts a new generation (cancelling the old one) and applies `f` under the same lock.
    fn advance<R>(&self, f: impl FnOnce(&mut Session) -> R) -> (GenerationGuard, R) {
        let mut session = self.inner.session.lock();
        let guard = self.inner.generation.cancel_and_advance();
        let out = f(&mut session);
        self.inner
            .snapshot_tx
            .send_replace(session.snapshot(guard.my_generation()));
        (guard, out)
    }

    fn translator_for(&self, language: Language) -> Option<Arc<TranslationService>> {
        if language == self.inner.source.language() {
            return None;
        }
        match &self.inner.translator {
            Some(t) => Some(Arc::clone(t)),
            None => {
                warn!(%language, "no translation backend, showing originals");
                None
            }
        }
    }

    // --- Initial load ---

    /// First load of the session. No-op unless the feed is uninitialized or empty.
    pub async fn initial_load(&self) {
        let guard = self.inner.generation.guard();
        let language = self
            .commit(&guard, |s| {
                matches!(s.state, FeedState::Uninitialized | FeedState::Empty).then_some(s.language)
            })
            .flatten();
        match language {
            Some(language) => self.run_initial_load(guard, language).await,
            None => debug!("initial load skipped, feed already populated"),
        }
    }

    async fn run_initial_load(&self, guard: GenerationGuard, language: Language) {
        let span = self.inner.metrics.span(metric_names::INITIAL_LOAD);
        *self.inner.reveal_started.lock() = Some(Instant::now());
        if self.commit(&guard, |s| s.transition(FeedState::InitialLoading)) != Some(true) {
            return;
        }

        match self.translator_for(language) {
            Some(translator) => self.load_translated(&guard, translator, language).await,
            None => {
                let originals = self.acquire_initial(&guard, self.inner.config.initial_batch).await;
                let poems: Vec<Arc<Poem>> = originals.iter().cloned().map(Arc::new).collect();
                self.commit(&guard, move |s| {
                    s.originals.extend(originals);
                    s.poems.extend(poems);
                });
            }
        }

        self.commit(&guard, |s| {
            s.settle();
            info!(
                language = %s.language,
                poems = s.poems.len(),
                degraded = s.degraded,
                "initial load finished"
            );
        });
        span.finish();
    }

    /// Upstream batch raced against the initial-load timeout and retried
    /// once. With the breaker open, the bundled poems stand in and the
    /// session is flagged degraded.
    async fn acquire_initial(&self, guard: &GenerationGuard, count: usize) -> Vec<Poem> {
        let source = &self.inner.source;
        let timeout = self.inner.config.initial_load_timeout;

        for attempt in 1..=2 {
            if !guard.should_continue() || !source.breaker().should_attempt() {
                break;
            }
            let fetch = source.fetch_many_cancellable(count, guard.token());
            let batch = tokio::time::timeout(timeout, fetch)
                .await
                .unwrap_or_else(|_| {
                    warn!(timeout_ms = timeout.as_millis() as u64, "initial batch timed out");
                    Vec::new()
                });
            if !batch.is_empty() {
                return batch;
            }
            if attempt == 1 {
                warn!("initial batch came back empty, retrying once");
            }
        }

        if guard.should_continue() && source.breaker().snapshot().is_open {
            warn!("upstream unavailable, entering degraded mode");
            self.inner.metrics.incr(metric_names::DEGRADED_SESSIONS);
            self.commit(guard, |s| s.degraded = true);
            return fallback_poems();
        }
        Vec::new()
    }

    /// Cached translations first; then either a background top-up or a
    /// progressive reveal of freshly translated poems.
    async fn load_translated(
        &self,
        guard: &GenerationGuard,
        translator: Arc<TranslationService>,
        language: Language,
    ) {
        let batch = self.inner.config.initial_batch;
        let cached = translator.cache().all_in(language);
        let cached_len = cached.len();
        self.inner.source.mark_used(cached.iter().map(|p| p.id));
        if cached_len > 0 {
            info!(cached = cached_len, %language, "showing cached translations");
            self.commit(guard, move |s| {
                s.poems.extend(cached);
                s.transition(FeedState::Ready);
            });
        }

        if cached_len >= batch {
            let this = self.clone();
            let guard = guard.clone();
            tokio::spawn(async move { this.top_up(guard, translator, language).await });
            return;
        }

        let originals = self.acquire_initial(guard, batch - cached_len).await;
        let remembered = originals.clone();
        self.commit(guard, move |s| s.originals.extend(remembered));
        self.reveal_translated(guard, &translator, originals, language, self.inner.config.initial_chunk)
            .await;
    }

    /// Background refill after a cache-served initial load.
    async fn top_up(&self, guard: GenerationGuard, translator: Arc<TranslationService>, language: Language) {
        let originals = self
            .inner
            .source
            .fetch_many_cancellable(self.inner.config.initial_batch, guard.token())
            .await;
        if originals.is_empty() || !guard.should_continue() {
            debug!("background top-up found nothing");
            return;
        }
        let remembered = originals.clone();
        if self.commit(&guard, move |s| s.originals.extend(remembered)).is_none() {
            return;
        }
        let added = self
            .reveal_translated(&guard, &translator, originals, language, self.inner.config.initial_chunk)
            .await;
        debug!(added, "background top-up finished");
    }

    /// Translates `originals` chunk by chunk, appending each chunk as soon as
    /// it completes. Returns how many poems were revealed.
    async fn reveal_translated(
        &self,
        guard: &GenerationGuard,
        translator: &TranslationService,
        originals: Vec<Poem>,
        target: Language,
        chunk_size: usize,
    ) -> usize {
        let mut revealed = 0;
        for chunk in originals.chunks(chunk_size.max(1)) {
            if !guard.should_continue() {
                break;
            }
            let translated = self.translate_concurrently(guard, translator, chunk, target).await;
            let n = translated.len();
            let committed = self.commit(guard, move |s| {
                s.poems.extend(translated);
                if !s.poems.is_empty() && s.state.is_loading() {
                    s.transition(FeedState::Ready);
                }
            });
            if committed.is_none() {
                break;
            }
            revealed += n;
            debug!(chunk = n, revealed, "chunk revealed");
        }
        revealed
    }

    /// Translates a chunk in parallel, keeping input order and skipping failures.
    async fn translate_concurrently(
        &self,
        guard: &GenerationGuard,
        translator: &TranslationService,
        poems: &[Poem],
        target: Language,
    ) -> Vec<Arc<Poem>> {
        let results = join_all(
            poems
                .iter()
                .map(|p| translator.translate_cancellable(p, target, guard.token())),
        )
        .await;

        poems
            .iter()
            .zip(results)
            .filter_map(|(poem, result)| match result {
                Ok(translated) => Some(translated),
                Err(TranslateError::Cancelled) => None,
                Err(e) => {
                    self.inner.metrics.incr(metric_names::TRANSLATION_SKIPPED);
                    warn!(id = poem.id, %target, error = %e, "translation failed, skipping poem");
                    None
                }
            })
            .collect()
    }

    // --- Pagination ---

    /// Appends one more batch. Returns how many poems were added; 0 when a
    /// refresh, switch or teardown superseded it.
    pub async fn load_more(&self) -> usize {
        let guard = self.inner.generation.guard();
        let language = self
            .commit(&guard, |s| {
                let go = s.state == FeedState::Ready && s.has_more;
                (go && s.transition(FeedState::LoadingMore)).then_some(s.language)
            })
            .flatten();
        let Some(language) = language else {
            return 0;
        };

        let span = self.inner.metrics.span(metric_names::LOAD_MORE);
        let translator = self.translator_for(language);
        let count = match translator {
            Some(_) => self.inner.config.load_more_translated,
            None => self.inner.config.load_more_source,
        };
        let originals = self
            .inner
            .source
            .fetch_many_cancellable(count, guard.token())
            .await;
        let fresh = match &translator {
            Some(t) => self.translate_concurrently(&guard, t, &originals, language).await,
            None => originals.iter().cloned().map(Arc::new).collect(),
        };
        let added = fresh.len();

        let committed = self.commit(&guard, move |s| {
            s.originals.extend(originals);
            if fresh.is_empty() {
                s.has_more = false;
                info!("feed exhausted for this session");
            }
            s.poems.extend(fresh);
            s.transition(FeedState::Ready);
        });
        if committed.is_none() {
            debug!("superseded batch discarded");
            return 0;
        }
        span.finish();
        added
    }

    /// Loads more once the reader is within the threshold of the end.
    pub async fn on_position(&self, index: usize) -> usize {
        let len = self.inner.session.lock().poems.len();
        if index + self.inner.config.load_more_threshold >= len {
            self.load_more().await
        } else {
            0
        }
    }

    // --- Language switch ---

    pub async fn switch_language(&self, language: Language) {
        let snapshot = self.snapshot();
        if snapshot.language == language && snapshot.state == FeedState::Ready {
            return;
        }
        if let Err(e) = save_ui_language(self.inner.store.as_ref(), language) {
            warn!(error = %e, "failed to persist language preference");
        }

        let span = self.inner.metrics.span(metric_names::LANGUAGE_SWITCH);
        let (guard, originals) = self.advance(|s| {
            s.language = language;
            s.transition(FeedState::SwitchingLanguage);
            s.poems.clear();
            s.has_more = true;
            s.originals.clone()
        });
        info!(%language, originals = originals.len(), "switching feed language");

        if originals.is_empty() {
            self.run_initial_load(guard, language).await;
        } else {
            match self.translator_for(language) {
                Some(translator) => {
                    self.reveal_translated(
                        &guard,
                        &translator,
                        originals,
                        language,
                        self.inner.config.switch_chunk,
                    )
                    .await;
                }
                None => {
                    self.commit(&guard, move |s| {
                        s.poems = originals.into_iter().map(Arc::new).collect();
                    });
                }
            }
            self.commit(&guard, |s| s.settle());
        }
        span.finish();
    }

    // --- Reset ---

    /// Drops everything session-scoped and loads again from scratch.
    pub async fn refresh(&self) {
        info!("feed refresh");
        self.inner.explainer.cancel_all();
        self.inner.explainer.clear();
        let (guard, language) = self.advance(|s| {
            s.transition(FeedState::Refreshing);
            s.reset();
            s.language
        });
        // after the advance, so a cancelled batch cannot re-mark ids
        self.inner.source.clear_used_ids();
        self.inner.source.breaker().reset();
        self.run_initial_load(guard, language).await;
    }

    /// Silences every outstanding task. Nothing is published.
    pub fn teardown(&self) {
        self.inner.explainer.cancel_all();
        let _session = self.inner.session.lock();
        let guard = self.inner.generation.cancel_and_advance();
        debug!(generation = guard.my_generation(), "feed torn down");
    }

    // --- Explanations ---

    /// Explanation in the feed's current language.
    pub async fn explain(&self, poem: &Poem, force_refresh: bool) -> Explanation {
        let language = self.language();
        self.inner.explainer.explain(poem, language, force_refresh).await
    }

    pub async fn explain_full(&self, poem: &Poem, force_refresh: bool) -> FullTafsir {
        let language = self.language();
        self.inner
            .explainer
            .explain_full(poem, language, force_refresh)
            .await
    }
}
