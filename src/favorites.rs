//! Per-user favorites and profile, namespaced by user id on the key-value store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::poem::{Language, Poem, PoemKey};
use crate::store::{get_json, set_json, KeyValueStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub poem: Poem,
    pub favorited_at: DateTime<Utc>,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub preferred_language: Language,
}

pub struct FavoritesStore {
    store: Arc<dyn KeyValueStore>,
}

impl FavoritesStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn favorites_key(user_id: &str) -> String {
        format!("favorites:{user_id}")
    }

    fn profile_key(user_id: &str) -> String {
        format!("profile:{user_id}")
    }

    /// Newest first.
    pub fn list(&self, user_id: &str) -> Result<Vec<Favorite>, StoreError> {
        Ok(get_json(self.store.as_ref(), &Self::favorites_key(user_id))?.unwrap_or_default())
    }

    pub fn is_favorite(&self, user_id: &str, key: PoemKey) -> Result<bool, StoreError> {
        Ok(self.list(user_id)?.iter().any(|f| f.poem.key() == key))
    }

    /// Returns false if the poem was already a favorite.
    pub fn add(&self, user_id: &str, poem: &Poem) -> Result<bool, StoreError> {
        let mut favorites = self.list(user_id)?;
        if favorites.iter().any(|f| f.poem.key() == poem.key()) {
            debug!(user_id, key = %poem.key(), "already a favorite");
            return Ok(false);
        }
        favorites.insert(
            0,
            Favorite {
                poem: poem.clone(),
                favorited_at: Utc::now(),
                user_id: user_id.to_string(),
            },
        );
        set_json(self.store.as_ref(), &Self::favorites_key(user_id), &favorites)?;
        info!(user_id, key = %poem.key(), "favorite added");
        Ok(true)
    }

    /// Returns false if there was nothing to remove.
    pub fn remove(&self, user_id: &str, key: PoemKey) -> Result<bool, StoreError> {
        let mut favorites = self.list(user_id)?;
        let before = favorites.len();
        favorites.retain(|f| f.poem.key() != key);
        if favorites.len() == before {
            return Ok(false);
        }
        set_json(self.store.as_ref(), &Self::favorites_key(user_id), &favorites)?;
        info!(user_id, %key, "favorite removed");
        Ok(true)
    }

    pub fn profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        get_json(self.store.as_ref(), &Self::profile_key(user_id))
    }

    pub fn save_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &Self::profile_key(&profile.user_id), profile)
    }
}
