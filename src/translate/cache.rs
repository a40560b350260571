//! Two-level translation cache.
//! L1: in-memory LRU of shared `Arc<Poem>` values keyed by the translation's `PoemKey`.
//! L2: durable key-value store under `translation:{lang}:{id}`, surviving restarts.
//! Both levels remember a blake3 digest of the source poem; a digest mismatch is a miss.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::poem::{Language, Poem, PoemKey};
use crate::store::{get_json, set_json, KeyValueStore};

pub const TRANSLATION_PREFIX: &str = "translation:";

#[derive(Serialize, Deserialize)]
struct StoredTranslation {
    source_digest: String,
    poem: Poem,
}

struct L1Entry {
    source_digest: String,
    poem: Arc<Poem>,
}

pub struct TranslationCache {
    l1: Mutex<LruCache<PoemKey, L1Entry>>,
    store: Arc<dyn KeyValueStore>,
}

impl TranslationCache {
    pub fn new(capacity: usize, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            l1: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN),
            )),
            store,
        }
    }

    pub fn store_key(key: PoemKey) -> String {
        format!("{TRANSLATION_PREFIX}{}:{}", key.language, key.id)
    }

    pub fn prefix_for(language: Language) -> String {
        format!("{TRANSLATION_PREFIX}{language}:")
    }

    /// Fingerprint of everything the translation was derived from.
    pub fn source_digest(source: &Poem) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.language.code().as_bytes());
        hasher.update(b"|");
        hasher.update(source.title.as_bytes());
        hasher.update(b"|");
        hasher.update(source.poet.name.as_bytes());
        hasher.update(b"|");
        hasher.update(source.text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Cached translation of `source` into `target`, if any.
    pub fn get(&self, source: &Poem, target: Language) -> Option<Arc<Poem>> {
        let key = PoemKey {
            id: source.id,
            language: target,
        };
        let digest = Self::source_digest(source);

        {
            let mut l1 = self.l1.lock();
            if let Some(entry) = l1.get(&key) {
                if entry.source_digest == digest {
                    debug!(%key, "translation L1 hit");
                    return Some(Arc::clone(&entry.poem));
                }
                l1.pop(&key);
            }
        }

        let stored = match get_json::<StoredTranslation>(self.store.as_ref(), &Self::store_key(key))
        {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(%key, error = %e, "translation L2 read failed");
                return None;
            }
        };
        if stored.source_digest != digest {
            debug!(%key, "translation L2 stale (source changed)");
            return None;
        }
        debug!(%key, "translation L2 hit");
        let poem = Arc::new(stored.poem);
        self.l1.lock().put(
            key,
            L1Entry {
                source_digest: digest,
                poem: Arc::clone(&poem),
            },
        );
        Some(poem)
    }

    /// Writes L2 first, then L1. Returns the shared value now held by L1.
    pub fn insert(&self, source: &Poem, translated: Poem) -> Arc<Poem> {
        let key = translated.key();
        let digest = Self::source_digest(source);
        let stored = StoredTranslation {
            source_digest: digest.clone(),
            poem: translated,
        };
        if let Err(e) = set_json(self.store.as_ref(), &Self::store_key(key), &stored) {
            warn!(%key, error = %e, "translation L2 write failed");
        }
        let poem = Arc::new(stored.poem);
        self.l1.lock().put(
            key,
            L1Entry {
                source_digest: digest,
                poem: Arc::clone(&poem),
            },
        );
        poem
    }

    /// Every durable translation into `language`, in store key order.
    pub fn all_in(&self, language: Language) -> Vec<Arc<Poem>> {
        let keys = match self.store.keys_with_prefix(&Self::prefix_for(language)) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "translation L2 enumerate failed");
                return Vec::new();
            }
        };
        keys.iter()
            .filter_map(|k| match get_json::<StoredTranslation>(self.store.as_ref(), k) {
                Ok(stored) => stored.map(|s| Arc::new(s.poem)),
                Err(e) => {
                    warn!(key = %k, error = %e, "skipping unreadable translation");
                    None
                }
            })
            .collect()
    }

    pub fn l1_len(&self) -> usize {
        self.l1.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fallback::fallback_poems;
    use crate::store::MemoryStore;

    fn translated(source: &Poem) -> Poem {
        Poem {
            language: Language::English,
            title: "T".into(),
            ..source.clone()
        }
    }

    #[test]
    fn l1_returns_the_same_shared_value() {
        let cache = TranslationCache::new(4, Arc::new(MemoryStore::new()));
        let source = fallback_poems().remove(0);
        let inserted = cache.insert(&source, translated(&source));
        let hit = cache.get(&source, Language::English).unwrap();
        assert!(Arc::ptr_eq(&inserted, &hit));
    }

    #[test]
    fn l2_survives_a_fresh_l1() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let source = fallback_poems().remove(1);
        TranslationCache::new(4, Arc::clone(&store)).insert(&source, translated(&source));

        let cold = TranslationCache::new(4, store);
        assert_eq!(cold.l1_len(), 0);
        let hit = cold.get(&source, Language::English).unwrap();
        assert_eq!(hit.title, "T");
        assert_eq!(cold.l1_len(), 1);
        assert_eq!(cold.all_in(Language::English).len(), 1);
        assert!(cold.all_in(Language::Persian).is_empty());
    }

    #[test]
    fn changed_source_text_is_a_miss() {
        let cache = TranslationCache::new(4, Arc::new(MemoryStore::new()));
        let source = fallback_poems().remove(2);
        cache.insert(&source, translated(&source));
        let edited = Poem {
            text: format!("{}\nextra", source.text),
            ..source
        };
        assert!(cache.get(&edited, Language::English).is_none());
    }
}
