//! Poem translation via an LLM, cache-first.
//!
//! A translation is a new `Poem` keyed by `(original id, target language)`.
//! Missing sections in the model's answer fall back to the original poem
//! (or the poet-name table) rather than failing the whole translation.

pub mod cache;
pub mod llm;
pub mod parse;
pub mod poets;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::poem::{html_from_text, Language, Poem, Poet};
use crate::store::KeyValueStore;

use cache::TranslationCache;
use parse::{build_user_prompt, parse_sections, SYSTEM_PROMPT};
use poets::PoetNames;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("translation timeout")]
    Timeout,
    #[error("translation cancelled")]
    Cancelled,
    #[error("model returned no usable content")]
    EmptyResponse,
    #[error("model answered in {0} instead of translating")]
    Untranslated(Language),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Text completion backend (chat-completions style).
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        cancel_token: &CancellationToken,
    ) -> Result<String, TranslateError>;
}

pub struct TranslationService {
    backend: Arc<dyn CompletionBackend>,
    cache: TranslationCache,
    poets: PoetNames,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationService {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        store: Arc<dyn KeyValueStore>,
        poets: PoetNames,
        metrics: Arc<MetricsRegistry>,
        config: &FeedConfig,
    ) -> Self {
        Self {
            backend,
            cache: TranslationCache::new(config.translation_l1_capacity, store),
            poets,
            timeout: config.translate_timeout,
            metrics,
        }
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub async fn translate(&self, poem: &Poem, target: Language) -> Result<Arc<Poem>, TranslateError> {
        self.translate_cancellable(poem, target, &CancellationToken::new())
            .await
    }

    /// Cache-first translation. A cache hit never touches the backend.
    pub async fn translate_cancellable(
        &self,
        poem: &Poem,
        target: Language,
        cancel_token: &CancellationToken,
    ) -> Result<Arc<Poem>, TranslateError> {
        if poem.language == target {
            return Err(TranslateError::InvalidInput(format!(
                "poem {} is already in {target}",
                poem.id
            )));
        }
        if let Some(hit) = self.cache.get(poem, target) {
            return Ok(hit);
        }

        let span = self.metrics.span(metric_names::TRANSLATE);
        let user_prompt = build_user_prompt(poem, target);
        let call = self.backend.complete(SYSTEM_PROMPT, &user_prompt, cancel_token);
        let response = tokio::select! {
            r = tokio::time::timeout(self.timeout, call) => match r {
                Ok(inner) => inner,
                Err(_) => Err(TranslateError::Timeout),
            },
            _ = cancel_token.cancelled() => Err(TranslateError::Cancelled),
        };
        let elapsed_us = span.finish();

        let response = response.inspect_err(|e| {
            warn!(id = poem.id, %target, error = %e, "translation failed");
        })?;

        let translated = self.assemble(poem, target, &response)?;
        info!(
            id = poem.id,
            %target,
            elapsed_ms = elapsed_us / 1000.0,
            "poem translated"
        );
        Ok(self.cache.insert(poem, translated))
    }

    /// Builds the translated poem from the model output, falling back per field.
    /// A `POEM:` section still written in the source language is rejected.
    fn assemble(&self, original: &Poem, target: Language, response: &str) -> Result<Poem, TranslateError> {
        let sections = parse_sections(response);

        let text = match sections.poem {
            Some(text) if Language::detect(&text) == Some(original.language) => {
                warn!(id = original.id, %target, "model echoed the source text");
                return Err(TranslateError::Untranslated(original.language));
            }
            Some(text) => text,
            None => {
                debug!(id = original.id, "no POEM section, keeping original text");
                original.text.clone()
            }
        };
        let title = sections.title.unwrap_or_else(|| original.title.clone());
        let name = sections
            .poet
            .or_else(|| self.poets.lookup(&original.poet.name, target))
            .or_else(|| self.poets.lookup(&original.poet.full_name, target))
            .unwrap_or_else(|| original.poet.name.clone());

        Ok(Poem {
            id: original.id,
            language: target,
            title,
            html_text: html_from_text(&text),
            text,
            poet: Poet {
                id: original.poet.id,
                full_name: name.clone(),
                name,
            },
        })
    }
}
