//! Client-side cache of completed classification results.
//!
//! Results, recency and bookmarks are durable across restarts; per-key
//! loading/error flags live for the process only. All writes go through the
//! single mutex, so concurrent write paths (e.g. a bookmark toggle racing a
//! delete) serialize instead of losing updates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::AnalysisResult;
use crate::util::persistence::{PersistError, StateStore};

const STORE_KEY: &str = "analysis_results";

/// Most-recent list never grows past this.
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no result cached under id {0}")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] PersistError),
}

/// Durable projection — the only part that reaches the store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PersistedResults {
    results: HashMap<String, AnalysisResult>,
    recent: Vec<String>,
    bookmarked: HashSet<String>,
}

#[derive(Default)]
struct CacheState {
    durable: PersistedResults,
    loading: HashSet<String>,
    errors: HashMap<String, String>,
}

pub struct ResultCache {
    state: Mutex<CacheState>,
    store: Arc<dyn StateStore>,
}

impl ResultCache {
    /// Build the cache, restoring the durable projection from the store.
    /// A corrupt payload is discarded rather than blocking startup.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, CacheError> {
        let durable = match store.get(STORE_KEY).await? {
            Some(raw) => match serde_json::from_str::<PersistedResults>(&raw) {
                Ok(persisted) => {
                    debug!(target: "cache", results = persisted.results.len(), "restored result cache");
                    persisted
                }
                Err(err) => {
                    warn!(target: "cache", %err, "failed to parse persisted results; starting empty");
                    PersistedResults::default()
                }
            },
            None => PersistedResults::default(),
        };

        Ok(Self {
            state: Mutex::new(CacheState {
                durable,
                loading: HashSet::new(),
                errors: HashMap::new(),
            }),
            store,
        })
    }

    async fn persist(&self, durable: &PersistedResults) -> Result<(), CacheError> {
        let json = serde_json::to_string(durable).map_err(PersistError::from)?;
        self.store.set(STORE_KEY, json).await?;
        Ok(())
    }

    /// Idempotent upsert; also front-pushes the id onto the recency list,
    /// de-duplicating and truncating to the 10 most recent.
    pub async fn save(&self, mut result: AnalysisResult) -> Result<(), CacheError> {
        // Bookmarking lives in the bookmark set; the stored record stays
        // canonical.
        result.is_bookmarked = false;
        let id = result.id.clone();

        let mut state = self.state.lock().await;
        state.durable.results.insert(id.clone(), result);
        state.durable.recent.retain(|existing| existing != &id);
        state.durable.recent.insert(0, id.clone());
        state.durable.recent.truncate(RECENT_LIMIT);

        debug!(target: "cache", %id, recent = state.durable.recent.len(), "saved result");
        self.persist(&state.durable).await
    }

    /// Stored result, with the bookmark flag overlaid. Never fetches.
    pub async fn get(&self, id: &str) -> Option<AnalysisResult> {
        let state = self.state.lock().await;
        state.durable.results.get(id).map(|result| {
            let mut result = result.clone();
            result.is_bookmarked = state.durable.bookmarked.contains(id);
            result
        })
    }

    /// Remove a result from storage, recency, bookmarks and transient flags.
    /// Deleting an absent id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        let existed = state.durable.results.remove(id).is_some();
        state.durable.recent.retain(|existing| existing != id);
        state.durable.bookmarked.remove(id);
        state.loading.remove(id);
        state.errors.remove(id);

        if !existed {
            return Ok(());
        }
        debug!(target: "cache", %id, "deleted result");
        self.persist(&state.durable).await
    }

    /// Flip the bookmark flag; returns the new state. Bookmarking an id not
    /// present in the cache is an error.
    pub async fn toggle_bookmark(&self, id: &str) -> Result<bool, CacheError> {
        let mut state = self.state.lock().await;
        if !state.durable.results.contains_key(id) {
            return Err(CacheError::NotFound(id.to_string()));
        }

        let bookmarked = if state.durable.bookmarked.remove(id) {
            false
        } else {
            state.durable.bookmarked.insert(id.to_string());
            true
        };
        self.persist(&state.durable).await?;
        Ok(bookmarked)
    }

    pub async fn is_bookmarked(&self, id: &str) -> bool {
        self.state.lock().await.durable.bookmarked.contains(id)
    }

    /// Most recently saved results, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<AnalysisResult> {
        let state = self.state.lock().await;
        state
            .durable
            .recent
            .iter()
            .take(limit)
            .filter_map(|id| state.durable.results.get(id))
            .map(|result| {
                let mut result = result.clone();
                result.is_bookmarked = state.durable.bookmarked.contains(&result.id);
                result
            })
            .collect()
    }

    pub async fn bookmarked(&self) -> Vec<AnalysisResult> {
        let state = self.state.lock().await;
        let mut results: Vec<AnalysisResult> = state
            .durable
            .bookmarked
            .iter()
            .filter_map(|id| state.durable.results.get(id))
            .map(|result| {
                let mut result = result.clone();
                result.is_bookmarked = true;
                result
            })
            .collect();
        // HashSet order is arbitrary; newest first keeps the view stable.
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results
    }

    /// Transient per-key loading flag; independent of cached data, so a key
    /// can load while a stale value is still displayed.
    pub async fn set_loading(&self, id: &str, loading: bool) {
        let mut state = self.state.lock().await;
        if loading {
            state.loading.insert(id.to_string());
        } else {
            state.loading.remove(id);
        }
    }

    pub async fn is_loading(&self, id: &str) -> bool {
        self.state.lock().await.loading.contains(id)
    }

    /// Transient per-key error message; `None` clears it.
    pub async fn set_error(&self, id: &str, message: Option<String>) {
        let mut state = self.state.lock().await;
        match message {
            Some(message) => {
                state.errors.insert(id.to_string(), message);
            }
            None => {
                state.errors.remove(id);
            }
        }
    }

    pub async fn error_for(&self, id: &str) -> Option<String> {
        self.state.lock().await.errors.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.durable.results.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.durable.results.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Clear everything, including the persisted projection. Used on user
    /// sign-out.
    pub async fn reset(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        state.durable = PersistedResults::default();
        state.loading.clear();
        state.errors.clear();
        self.store.delete(STORE_KEY).await?;
        debug!(target: "cache", "result cache reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::persistence::MemoryStore;

    fn result(id: &str) -> AnalysisResult {
        AnalysisResult {
            id: id.to_string(),
            session_id: format!("session-{id}"),
            recommended_code: "8517.12".to_string(),
            confidence: 0.9,
            reasoning: "test".to_string(),
            alternatives: Vec::new(),
            import_requirements: Vec::new(),
            export_requirements: Vec::new(),
            related_regulations: Vec::new(),
            trade_statistics: None,
            created_at: 0,
            is_bookmarked: false,
        }
    }

    async fn cache() -> ResultCache {
        ResultCache::load(Arc::new(MemoryStore::new())).await.unwrap()
    }

    #[tokio::test]
    async fn recent_caps_at_ten_without_duplicates() {
        let cache = cache().await;
        for i in 0..15 {
            cache.save(result(&format!("r{i}"))).await.unwrap();
        }
        // Re-saving an old id moves it to the front instead of duplicating.
        cache.save(result("r10")).await.unwrap();

        let recent = cache.recent(RECENT_LIMIT + 5).await;
        assert_eq!(recent.len(), RECENT_LIMIT);
        assert_eq!(recent[0].id, "r10");

        let mut ids: Vec<_> = recent.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), RECENT_LIMIT);
    }

    #[tokio::test]
    async fn toggle_bookmark_is_its_own_inverse() {
        let cache = cache().await;
        cache.save(result("r1")).await.unwrap();

        assert!(cache.toggle_bookmark("r1").await.unwrap());
        assert!(cache.is_bookmarked("r1").await);
        assert!(cache.get("r1").await.unwrap().is_bookmarked);

        assert!(!cache.toggle_bookmark("r1").await.unwrap());
        assert!(!cache.is_bookmarked("r1").await);
        assert!(!cache.get("r1").await.unwrap().is_bookmarked);
    }

    #[tokio::test]
    async fn bookmarking_an_absent_id_fails() {
        let cache = cache().await;
        match cache.toggle_bookmark("missing").await {
            Err(CacheError::NotFound(id)) => assert_eq!(id, "missing"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_clears_every_trace() {
        let cache = cache().await;
        cache.save(result("r1")).await.unwrap();
        cache.toggle_bookmark("r1").await.unwrap();
        cache.set_loading("r1", true).await;
        cache.set_error("r1", Some("stale".into())).await;

        cache.delete("r1").await.unwrap();
        assert!(cache.get("r1").await.is_none());
        assert!(!cache.is_bookmarked("r1").await);
        assert!(!cache.is_loading("r1").await);
        assert!(cache.error_for("r1").await.is_none());
        assert!(cache.recent(10).await.is_empty());

        // Idempotent on an absent id.
        cache.delete("r1").await.unwrap();
    }

    #[tokio::test]
    async fn loading_flag_is_independent_of_cached_data() {
        let cache = cache().await;
        cache.save(result("r1")).await.unwrap();
        cache.set_loading("r1", true).await;
        assert!(cache.is_loading("r1").await);
        // Stale value still readable while loading.
        assert!(cache.get("r1").await.is_some());

        cache.set_loading("missing", true).await;
        assert!(cache.is_loading("missing").await);
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn durable_projection_survives_restart_but_flags_do_not() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());

        let cache = ResultCache::load(store.clone()).await.unwrap();
        cache.save(result("r1")).await.unwrap();
        cache.toggle_bookmark("r1").await.unwrap();
        cache.set_loading("r1", true).await;
        cache.set_error("r1", Some("transient".into())).await;
        drop(cache);

        let reloaded = ResultCache::load(store).await.unwrap();
        assert!(reloaded.get("r1").await.unwrap().is_bookmarked);
        assert_eq!(reloaded.recent(10).await[0].id, "r1");
        assert!(!reloaded.is_loading("r1").await);
        assert!(reloaded.error_for("r1").await.is_none());
    }

    #[tokio::test]
    async fn reset_clears_state_and_store() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let cache = ResultCache::load(store.clone()).await.unwrap();
        cache.save(result("r1")).await.unwrap();

        cache.reset().await.unwrap();
        assert!(cache.is_empty().await);

        let reloaded = ResultCache::load(store).await.unwrap();
        assert!(reloaded.is_empty().await);
    }
}
