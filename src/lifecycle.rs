//! Application lifecycle and session state.
//!
//! [`App`] ties the pieces together in startup order: open the store,
//! reconcile the cache schema, restore the cached record set, bring up the
//! index. Lifecycle position is explicit state on the struct — there is no
//! process-wide "already initialized" flag — and migration is guaranteed to
//! run before the first index restore.

use anyhow::Result;

use crate::archive;
use crate::cache::{BlobCache, KEY_ARCHIVE, KEY_RECORDS};
use crate::config::Config;
use crate::engine::Bm25Index;
use crate::index::IndexManager;
use crate::migrate;
use crate::models::{ConversationRecord, MatchMode, RankedResult, SortBy};
use crate::transform::{self, TransformError};

/// Where the application is in its startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    /// Store opened, schema not yet reconciled.
    Opened,
    /// Schema reconciled; cached data may now be restored.
    Migrated,
    /// Record set and index restored (possibly empty); queries may run.
    Ready,
}

/// One running session over the local store.
pub struct App {
    cache: BlobCache,
    namespace: String,
    index: IndexManager<Bm25Index>,
    records: Vec<ConversationRecord>,
    lifecycle: AppLifecycle,
    is_loading: bool,
    is_indexing: bool,
}

impl App {
    /// Open the store, reconcile the schema, and restore whatever record
    /// set and index the cache holds.
    pub async fn start(config: &Config) -> Result<App> {
        let cache = BlobCache::open(&config.db.path).await?;
        let namespace = migrate::active_namespace();
        let index = IndexManager::new(cache.clone(), namespace.clone(), config.index.options());

        let mut app = App {
            cache,
            namespace,
            index,
            records: Vec::new(),
            lifecycle: AppLifecycle::Opened,
            is_loading: false,
            is_indexing: false,
        };

        migrate::ensure_current(&app.cache).await;
        app.lifecycle = AppLifecycle::Migrated;

        app.restore_records().await;
        app.is_indexing = true;
        app.index.load(&app.records).await;
        app.is_indexing = false;

        app.lifecycle = AppLifecycle::Ready;
        Ok(app)
    }

    async fn restore_records(&mut self) {
        match self
            .cache
            .get_json::<Vec<ConversationRecord>>(&self.namespace, KEY_RECORDS)
            .await
        {
            Ok(Some(records)) => self.records = records,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "cached record set unreadable, starting empty");
            }
        }
    }

    /// Load a new archive: transform, persist, and reindex. The new record
    /// set supersedes the previous one entirely; a transform failure leaves
    /// previously loaded data untouched.
    pub async fn load_archive(&mut self, bytes: &[u8]) -> Result<usize, TransformError> {
        self.is_loading = true;
        let result = self.load_archive_inner(bytes).await;
        self.is_loading = false;
        result
    }

    async fn load_archive_inner(&mut self, bytes: &[u8]) -> Result<usize, TransformError> {
        let export = archive::read_export(bytes)?;
        let records = transform::transform_str(&export)?;

        // Persist best-effort: a write failure costs the next cold start its
        // fast path, not this session.
        if let Err(e) = self
            .cache
            .put_json(&self.namespace, KEY_RECORDS, &records)
            .await
        {
            tracing::warn!(error = %e, "failed to persist record set");
        }
        if let Err(e) = self.cache.put(&self.namespace, KEY_ARCHIVE, bytes).await {
            tracing::warn!(error = %e, "failed to persist archive bytes");
        }

        self.records = records;
        self.is_indexing = true;
        self.index.load(&self.records).await;
        self.is_indexing = false;

        Ok(self.records.len())
    }

    /// Query the current record set.
    pub fn search(&self, query: &str, mode: MatchMode, sort: SortBy) -> Vec<RankedResult> {
        self.index.query(&self.records, query, mode, sort)
    }

    /// The current record set, in `created_at`-ascending order.
    pub fn records(&self) -> &[ConversationRecord] {
        &self.records
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        self.lifecycle
    }

    /// True while an archive is being transformed and persisted.
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// True while the index is being restored or rebuilt.
    pub fn is_indexing(&self) -> bool {
        self.is_indexing
    }

    /// Fingerprint of the live index, if one is up.
    pub fn live_fingerprint(&self) -> Option<String> {
        self.index.live_fingerprint()
    }

    /// The persisted schema-version marker, if readable.
    pub async fn schema_version(&self) -> Option<String> {
        self.cache
            .get_setting(migrate::SCHEMA_MARKER_KEY)
            .await
            .ok()
            .flatten()
    }
}
