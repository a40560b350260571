//! Explanation backend client: `POST {base}/explain`.
//! The backend may take up to a minute and may answer with loosely-typed
//! JSON, so every field is coerced rather than trusted.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::poem::{Language, Poem};

use super::types::{Depth, Explanation, ExplanationOrigin, FullTafsir, LineMeaning};
use super::ExplainError;

#[async_trait]
pub trait ExplainBackend: Send + Sync {
    /// Returns the `explanation` object of the backend's reply.
    async fn explain(&self, poem: &Poem, language: Language, depth: Depth)
        -> Result<Value, ExplainError>;
}

pub struct HttpExplainBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExplainBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ExplainError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExplainError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

pub fn request_body(poem: &Poem, language: Language, depth: Depth) -> Value {
    serde_json::json!({
        "poem": {
            "id": poem.id,
            "text": poem.text,
            "title": poem.title,
            "poet": poem.poet.name,
        },
        "language": language.code(),
        "depth": depth,
    })
}

#[async_trait]
impl ExplainBackend for HttpExplainBackend {
    async fn explain(
        &self,
        poem: &Poem,
        language: Language,
        depth: Depth,
    ) -> Result<Value, ExplainError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(%request_id, id = poem.id, %language, ?depth, "explanation request");
        let resp = self
            .http
            .post(format!("{}/explain", self.base_url))
            .header("x-request-id", &request_id)
            .json(&request_body(poem, language, depth))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExplainError::Timeout
                } else {
                    ExplainError::Transport(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(ExplainError::Status(resp.status().as_u16()));
        }
        let mut body: Value = resp
            .json()
            .await
            .map_err(|e| ExplainError::Malformed(e.to_string()))?;
        match body.get_mut("explanation") {
            Some(explanation) => Ok(explanation.take()),
            None => Err(ExplainError::Malformed("reply has no explanation".into())),
        }
    }
}

/// Strings pass through; null is absent; anything else is serialized.
pub fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) if items.iter().all(Value::is_string) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("، "),
        ),
        other => Some(other.to_string()),
    }
}

fn field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    value.get(camel).or_else(|| value.get(snake))
}

pub fn coerce_explanation(value: &Value) -> Result<Explanation, ExplainError> {
    if !value.is_object() {
        return Err(ExplainError::Malformed("explanation is not an object".into()));
    }
    let general_meaning = coerce_text(field(value, "generalMeaning", "general_meaning"))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExplainError::Malformed("missing generalMeaning".into()))?;

    let line_by_line = field(value, "lineByLine", "line_by_line")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let original = coerce_text(item.get("original"))?;
                    let meaning = coerce_text(item.get("meaning")).unwrap_or_default();
                    Some(LineMeaning { original, meaning })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Explanation {
        line_by_line,
        general_meaning,
        main_themes: coerce_text(field(value, "mainThemes", "main_themes")).unwrap_or_default(),
        imagery_symbols: coerce_text(field(value, "imagerySymbols", "imagery_symbols"))
            .unwrap_or_default(),
        literary_devices: coerce_text(field(value, "literaryDevices", "literary_devices")),
        origin: ExplanationOrigin::Remote,
    })
}

pub fn coerce_tafsir(value: Value, couplet_count: usize) -> Result<FullTafsir, ExplainError> {
    let tafsir: FullTafsir =
        serde_json::from_value(value).map_err(|e| ExplainError::Malformed(e.to_string()))?;
    if tafsir.overall_meaning.text.trim().is_empty() && tafsir.themes.is_empty() {
        return Err(ExplainError::Malformed("tafsir has no content".into()));
    }
    Ok(FullTafsir {
        origin: ExplanationOrigin::Remote,
        ..tafsir.sanitize(couplet_count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_where_strings_belong_are_serialized() {
        let value = json!({
            "generalMeaning": {"summary": "love"},
            "mainThemes": ["عشق", "می"],
            "imagerySymbols": null,
            "lineByLine": [{"original": "a", "meaning": 3}, {"meaning": "orphan"}]
        });
        let e = coerce_explanation(&value).unwrap();
        assert_eq!(e.general_meaning, r#"{"summary":"love"}"#);
        assert_eq!(e.main_themes, "عشق، می");
        assert_eq!(e.imagery_symbols, "");
        assert_eq!(e.line_by_line.len(), 1);
        assert_eq!(e.line_by_line[0].meaning, "3");
    }

    #[test]
    fn missing_general_meaning_is_malformed() {
        assert!(coerce_explanation(&json!({"mainThemes": "x"})).is_err());
        assert!(coerce_explanation(&json!("just text")).is_err());
    }

    #[test]
    fn tafsir_is_sanitized_against_couplets() {
        let value = json!({
            "overall_meaning": {"text": "x", "evidence": [9]},
            "themes": [{"label": "love", "explanation": "", "evidence": [1, 4]}],
            "per_beyt": [{"index": 1, "text": "a", "readings": [{"kind": "mystical", "text": "r", "confidence": 1.7}]}]
        });
        let t = coerce_tafsir(value, 2).unwrap();
        assert_eq!(t.overall_meaning.evidence, vec![1]);
        assert_eq!(t.themes[0].evidence, vec![1]);
        assert_eq!(t.per_beyt[0].readings[0].confidence, 1.0);
        assert_eq!(t.origin, ExplanationOrigin::Remote);
    }

    #[test]
    fn request_body_carries_depth_and_language() {
        let poem = crate::source::fallback::fallback_poems().remove(0);
        let body = request_body(&poem, Language::English, Depth::Full);
        assert_eq!(body["language"], "en");
        assert_eq!(body["depth"], "full");
        assert_eq!(body["poem"]["id"], poem.id);
    }
}
