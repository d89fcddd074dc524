//! Index lifecycle and query orchestration.
//!
//! [`IndexManager`] owns the live in-memory index. `load` fingerprints the
//! record set, restores a persisted artifact when one matches, and otherwise
//! builds from scratch and persists best-effort. Publication is guarded by a
//! monotonic generation counter: a load superseded by a newer record set
//! never installs its result. Queries run against whatever index is live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::cache::{BlobCache, KEY_INDEX_META};
use crate::engine::{IndexOptions, SerializableIndex};
use crate::fingerprint::fingerprint;
use crate::models::{ConversationRecord, IndexArtifactMeta, MatchMode, RankedResult, SortBy};

/// Schema tag baked into index storage keys; bump together with the engine's
/// serialization format so old blobs stop matching the expected key scheme.
pub const INDEX_SCHEMA_TAG: &str = "bm25-v1";

/// Cache key for the serialized index of a given record-set fingerprint.
pub fn storage_key_for(fp: &str) -> String {
    format!("index:{INDEX_SCHEMA_TAG}:{fp}")
}

/// What `load` ended up doing. Informational; every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Empty record set: no live index, every query returns empty.
    Empty,
    /// A persisted artifact matched and was restored; no build ran.
    Restored,
    /// Built from scratch (and persisted best-effort).
    Built,
    /// A newer load started before this one finished; its result was
    /// discarded unpublished.
    Superseded,
}

struct LiveIndex<E> {
    fingerprint: String,
    engine: E,
}

/// Owns the live index and the persisted artifact for one cache namespace.
pub struct IndexManager<E: SerializableIndex> {
    cache: BlobCache,
    namespace: String,
    options: IndexOptions,
    generation: AtomicU64,
    live: RwLock<Option<LiveIndex<E>>>,
}

impl<E: SerializableIndex> IndexManager<E> {
    pub fn new(cache: BlobCache, namespace: String, options: IndexOptions) -> Self {
        Self {
            cache,
            namespace,
            options,
            generation: AtomicU64::new(0),
            live: RwLock::new(None),
        }
    }

    /// Fingerprint of the currently live index, if any.
    pub fn live_fingerprint(&self) -> Option<String> {
        self.live
            .read()
            .expect("index lock poisoned")
            .as_ref()
            .map(|l| l.fingerprint.clone())
    }

    /// Make `records` the indexed record set: restore a matching artifact or
    /// build and persist a new one. Never fails — every degraded path ends
    /// in a usable state (at worst, no live index).
    pub async fn load(&self, records: &[ConversationRecord]) -> LoadOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if records.is_empty() {
            if self.is_current(generation) {
                *self.live.write().expect("index lock poisoned") = None;
            }
            return LoadOutcome::Empty;
        }

        let fp = fingerprint(records);

        if let Some(engine) = self.try_restore(&fp).await {
            if !self.is_current(generation) {
                return LoadOutcome::Superseded;
            }
            self.publish(fp, engine);
            return LoadOutcome::Restored;
        }

        let engine = E::build(records, &self.options);
        let serialized = engine.serialize();

        if !self.is_current(generation) {
            return LoadOutcome::Superseded;
        }
        self.publish(fp.clone(), engine);

        // Persist failure only costs the fast path on the next cold start.
        match serialized {
            Ok(text) => self.persist(&fp, &text).await,
            Err(e) => {
                tracing::warn!(error = %e, "index serialization failed, skipping persist");
            }
        }

        LoadOutcome::Built
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self, fingerprint: String, engine: E) {
        *self.live.write().expect("index lock poisoned") = Some(LiveIndex { fingerprint, engine });
    }

    /// Attempt to restore the persisted index for `fp`. Every miss — absent
    /// metadata, fingerprint or key mismatch, foreign options, absent blob,
    /// deserialization failure — is uniform: `None`, never an error.
    async fn try_restore(&self, fp: &str) -> Option<E> {
        let meta: IndexArtifactMeta = match self
            .cache
            .get_json(&self.namespace, KEY_INDEX_META)
            .await
        {
            Ok(Some(meta)) => meta,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "index metadata unreadable, rebuilding");
                return None;
            }
        };

        if meta.fingerprint != fp || meta.storage_key != storage_key_for(fp) {
            tracing::debug!(
                cached = %meta.fingerprint,
                current = %fp,
                "index artifact does not match record set, rebuilding"
            );
            return None;
        }
        if meta.index_options != self.options {
            tracing::debug!("index artifact built with different options, rebuilding");
            return None;
        }

        let text = match self.cache.get_text(&self.namespace, &meta.storage_key).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!(key = %meta.storage_key, "index blob missing, rebuilding");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "index blob unreadable, rebuilding");
                return None;
            }
        };

        match E::deserialize(&text, &meta.index_options) {
            Ok(engine) => Some(engine),
            Err(e) => {
                tracing::debug!(error = %e, "index artifact failed to deserialize, rebuilding");
                None
            }
        }
    }

    async fn persist(&self, fp: &str, text: &str) {
        let key = storage_key_for(fp);
        if let Err(e) = self.cache.put_text(&self.namespace, &key, text).await {
            tracing::warn!(error = %e, "failed to persist index blob");
            return;
        }
        let meta = IndexArtifactMeta {
            fingerprint: fp.to_string(),
            storage_key: key,
            created_at: chrono::Utc::now().timestamp(),
            index_options: self.options.clone(),
        };
        if let Err(e) = self
            .cache
            .put_json(&self.namespace, KEY_INDEX_META, &meta)
            .await
        {
            tracing::warn!(error = %e, "failed to persist index metadata");
        }
    }

    /// Run a query against the live index (fuzzy) or the record sequence
    /// itself (exact). An empty query returns no results in every mode.
    pub fn query(
        &self,
        records: &[ConversationRecord],
        query: &str,
        mode: MatchMode,
        sort: SortBy,
    ) -> Vec<RankedResult> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let mut results = match mode {
            MatchMode::Exact => exact_search(records, query),
            MatchMode::Fuzzy => {
                let live = self.live.read().expect("index lock poisoned");
                match live.as_ref() {
                    Some(live) => live
                        .engine
                        .query(query)
                        .into_iter()
                        .map(|hit| RankedResult {
                            id: hit.id,
                            title: hit.title,
                            created_at: hit.created_at,
                            updated_at: hit.updated_at,
                            score: Some(hit.score),
                        })
                        .collect(),
                    None => Vec::new(),
                }
            }
        };

        sort_results(&mut results, sort);
        results
    }
}

/// Case-insensitive substring search over `title` and `text`, bypassing the
/// index. The synthetic score weighs title occurrences five times text
/// occurrences.
fn exact_search(records: &[ConversationRecord], query: &str) -> Vec<RankedResult> {
    let needle = query.to_lowercase();
    records
        .iter()
        .filter_map(|r| {
            let title_count = r.title.to_lowercase().matches(&needle).count();
            let text_count = r.text.to_lowercase().matches(&needle).count();
            if title_count == 0 && text_count == 0 {
                return None;
            }
            Some(RankedResult {
                id: r.id.clone(),
                title: r.title.clone(),
                created_at: r.created_at,
                updated_at: r.updated_at,
                score: Some((5 * title_count + text_count) as f64),
            })
        })
        .collect()
}

/// Sort results under the chosen mode. `Vec::sort_by` is stable, and every
/// mode ends with an id tie-break for fully deterministic output.
fn sort_results(results: &mut [RankedResult], sort: SortBy) {
    let score = |r: &RankedResult| r.score.unwrap_or(0.0);
    match sort {
        SortBy::Relevance => results.sort_by(|a, b| {
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(a.id.cmp(&b.id))
        }),
        SortBy::Updated => results.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then(
                    score(b)
                        .partial_cmp(&score(a))
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        }),
        SortBy::Created => results.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(
                    score(b)
                        .partial_cmp(&score(a))
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Bm25Index;
    use crate::models::Message;
    use tempfile::TempDir;

    fn record(id: &str, title: &str, text: &str, created: i64, updated: i64) -> ConversationRecord {
        ConversationRecord {
            id: id.to_string(),
            title: title.to_string(),
            created_at: created,
            updated_at: updated,
            messages: vec![Message {
                author: "user".to_string(),
                text: text.to_string(),
            }],
            text: format!("[user] {text}"),
        }
    }

    fn two_conversations() -> Vec<ConversationRecord> {
        vec![
            record("A", "Trip", "planning the trip", 100, 200),
            record("B", "Budget", "monthly numbers", 50, 300),
        ]
    }

    async fn manager_in(tmp: &TempDir) -> IndexManager<Bm25Index> {
        let cache = crate::cache::BlobCache::open(&tmp.path().join("cache.sqlite"))
            .await
            .unwrap();
        IndexManager::new(cache, "test-ns".to_string(), IndexOptions::default())
    }

    #[tokio::test]
    async fn test_empty_record_set_has_no_index() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp).await;

        assert_eq!(manager.load(&[]).await, LoadOutcome::Empty);
        assert_eq!(manager.live_fingerprint(), None);
        for mode in [MatchMode::Fuzzy, MatchMode::Exact] {
            for sort in [SortBy::Relevance, SortBy::Updated, SortBy::Created] {
                assert!(manager.query(&[], "trip", mode, sort).is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_build_then_restore() {
        let tmp = TempDir::new().unwrap();
        let records = two_conversations();

        let first = manager_in(&tmp).await;
        assert_eq!(first.load(&records).await, LoadOutcome::Built);
        let built = first.query(&records, "trip", MatchMode::Fuzzy, SortBy::Updated);

        // A fresh manager over the same store restores instead of building.
        let second = manager_in(&tmp).await;
        assert_eq!(second.load(&records).await, LoadOutcome::Restored);
        let restored = second.query(&records, "trip", MatchMode::Fuzzy, SortBy::Updated);

        let ids = |rs: &[RankedResult]| rs.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&built), ids(&restored));
    }

    #[tokio::test]
    async fn test_changed_records_rebuild() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp).await;

        let records = two_conversations();
        assert_eq!(manager.load(&records).await, LoadOutcome::Built);

        let mut changed = records.clone();
        changed[0].updated_at += 1;
        assert_eq!(manager.load(&changed).await, LoadOutcome::Built);
    }

    #[tokio::test]
    async fn test_latest_load_wins() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp).await;

        let first = two_conversations();
        let second = vec![record("C", "Recipes", "ramen", 10, 20)];

        manager.load(&first).await;
        manager.load(&second).await;

        assert_eq!(
            manager.live_fingerprint(),
            Some(crate::fingerprint::fingerprint(&second))
        );
        assert!(manager
            .query(&second, "trip", MatchMode::Fuzzy, SortBy::Relevance)
            .is_empty());
    }

    #[tokio::test]
    async fn test_scenario_trip_query_updated_sort() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp).await;
        let records = two_conversations();
        manager.load(&records).await;

        let results = manager.query(&records, "trip", MatchMode::Fuzzy, SortBy::Updated);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "A");

        for mode in [MatchMode::Fuzzy, MatchMode::Exact] {
            for sort in [SortBy::Relevance, SortBy::Updated, SortBy::Created] {
                assert!(manager.query(&records, "", mode, sort).is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_exact_mode_needs_no_index() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp).await;
        let records = two_conversations();
        // No load at all: exact search still works off the records.
        let results = manager.query(&records, "trip", MatchMode::Exact, SortBy::Relevance);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "A");
        // Title match ("Trip") plus one text occurrence.
        assert_eq!(results[0].score, Some(6.0));
    }

    #[test]
    fn test_exact_search_scores_title_heavier() {
        let records = vec![
            record("T", "trip notes", "nothing here", 1, 2),
            record("X", "misc", "trip trip trip trip", 1, 3),
        ];
        let results = exact_search(&records, "trip");
        let t = results.iter().find(|r| r.id == "T").unwrap();
        let x = results.iter().find(|r| r.id == "X").unwrap();
        assert_eq!(t.score, Some(5.0));
        assert_eq!(x.score, Some(4.0));
    }

    #[test]
    fn test_sort_modes() {
        let mk = |id: &str, created: i64, updated: i64, score: f64| RankedResult {
            id: id.to_string(),
            title: String::new(),
            created_at: created,
            updated_at: updated,
            score: Some(score),
        };
        let base = vec![
            mk("a", 10, 100, 1.0),
            mk("b", 30, 300, 2.0),
            mk("c", 20, 200, 3.0),
        ];

        let mut by_updated = base.clone();
        sort_results(&mut by_updated, SortBy::Updated);
        assert_eq!(
            by_updated.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "a"]
        );

        let mut by_created = base.clone();
        sort_results(&mut by_created, SortBy::Created);
        assert_eq!(
            by_created.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "a"]
        );

        let mut by_relevance = base;
        sort_results(&mut by_relevance, SortBy::Relevance);
        assert_eq!(
            by_relevance.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );
    }

    #[test]
    fn test_sort_tie_breaks() {
        let mk = |id: &str, updated: i64, score: f64| RankedResult {
            id: id.to_string(),
            title: String::new(),
            created_at: 0,
            updated_at: updated,
            score: Some(score),
        };

        // Equal scores: relevance falls back to updated_at descending.
        let mut results = vec![mk("old", 100, 2.0), mk("new", 200, 2.0)];
        sort_results(&mut results, SortBy::Relevance);
        assert_eq!(results[0].id, "new");

        // Equal updated_at: updated falls back to score descending.
        let mut results = vec![mk("low", 100, 1.0), mk("high", 100, 9.0)];
        sort_results(&mut results, SortBy::Updated);
        assert_eq!(results[0].id, "high");
    }
}
