//! Startup cache-schema reconciliation.
//!
//! Runs once per process, before the first index restore, and reconciles
//! whatever namespaces are on disk with the version this build expects:
//! superseded same-generation namespaces are dropped, enumerated legacy
//! namespaces have their well-known keys carried over and are then removed,
//! and stray settings from retired persistence strategies are purged.
//!
//! Every step is best-effort. A failing step is logged and the remaining
//! steps still run; startup is never blocked.

use crate::cache::{BlobCache, KEY_ARCHIVE, KEY_INDEX_META, KEY_RECORDS};
use crate::models::IndexArtifactMeta;

/// Version of the on-disk cache layout this build writes.
pub const CACHE_VERSION: u32 = 2;

const NAMESPACE_PREFIX: &str = "convodex-cache-v";

/// Settings slot holding the last-reconciled schema version.
pub const SCHEMA_MARKER_KEY: &str = "schema_version";

/// Namespaces from older layouts that are still worth harvesting. This is a
/// deliberate allow-list — matching on a pattern here could eat data that
/// merely looks like ours.
const LEGACY_NAMESPACES: &[&str] = &["convodex-cache-v1"];

/// String-keyed settings written by persistence strategies that no longer
/// exist. Purged on migration, best-effort.
const LEGACY_SETTINGS_KEYS: &[&str] = &["conversations", "index-meta"];

/// The namespace all current reads and writes go through.
pub fn active_namespace() -> String {
    format!("{NAMESPACE_PREFIX}{CACHE_VERSION}")
}

#[derive(Debug, PartialEq, Eq)]
enum MarkerState {
    /// Marker missing or unreadable.
    Unknown,
    /// Marker present but older than this build.
    Stale,
    /// Nothing to do.
    Current,
}

/// Reconcile the store with this build's layout. Idempotent and safe to call
/// on every startup; returns without touching anything when the marker is
/// already current.
pub async fn ensure_current(cache: &BlobCache) {
    match read_marker(cache).await {
        MarkerState::Current => {
            tracing::debug!("cache schema marker is current");
            return;
        }
        state @ (MarkerState::Unknown | MarkerState::Stale) => {
            tracing::info!(?state, version = CACHE_VERSION, "reconciling cache schema");
        }
    }

    migrate(cache).await;

    if let Err(e) = cache
        .put_setting(SCHEMA_MARKER_KEY, &CACHE_VERSION.to_string())
        .await
    {
        tracing::warn!(error = %e, "failed to write schema marker");
    }
}

async fn read_marker(cache: &BlobCache) -> MarkerState {
    match cache.get_setting(SCHEMA_MARKER_KEY).await {
        Ok(Some(value)) => match value.parse::<u32>() {
            // A marker from a newer build is left alone: migrating "forward"
            // over it could delete data this build cannot rebuild.
            Ok(v) if v >= CACHE_VERSION => MarkerState::Current,
            Ok(_) => MarkerState::Stale,
            Err(_) => MarkerState::Unknown,
        },
        Ok(None) => MarkerState::Unknown,
        Err(e) => {
            tracing::warn!(error = %e, "schema marker unreadable");
            MarkerState::Unknown
        }
    }
}

async fn migrate(cache: &BlobCache) {
    let active = active_namespace();

    // Superseded versions of the current naming generation carry nothing
    // worth keeping; drop them outright. Allow-listed legacy namespaces are
    // handled by the copy pass below, and anything not matching our naming
    // at all is not ours to touch.
    match cache.list_namespaces().await {
        Ok(namespaces) => {
            for ns in namespaces {
                if ns != active
                    && is_versioned_name(&ns)
                    && !LEGACY_NAMESPACES.contains(&ns.as_str())
                {
                    match cache.delete_namespace(&ns).await {
                        Ok(()) => {
                            tracing::info!(namespace = %ns, "deleted superseded cache namespace");
                        }
                        Err(e) => {
                            tracing::warn!(namespace = %ns, error = %e, "failed to delete superseded namespace");
                        }
                    }
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to enumerate cache namespaces"),
    }

    for legacy in LEGACY_NAMESPACES {
        migrate_legacy_namespace(cache, legacy, &active).await;
    }

    for key in LEGACY_SETTINGS_KEYS {
        if let Err(e) = cache.delete_setting(key).await {
            tracing::debug!(key, error = %e, "failed to purge legacy setting");
        }
    }
}

/// Carry the well-known keys out of one legacy namespace, then delete it.
///
/// The delete happens regardless of copy success: retrying the same
/// mismatched data on every startup helps nobody.
async fn migrate_legacy_namespace(cache: &BlobCache, legacy: &str, active: &str) {
    copy_if_absent(cache, legacy, active, KEY_RECORDS).await;
    copy_if_absent(cache, legacy, active, KEY_ARCHIVE).await;

    match cache
        .get_json::<IndexArtifactMeta>(legacy, KEY_INDEX_META)
        .await
    {
        Ok(Some(meta)) => {
            copy_if_absent(cache, legacy, active, &meta.storage_key).await;
            copy_if_absent(cache, legacy, active, KEY_INDEX_META).await;
        }
        Ok(None) => {
            tracing::debug!(namespace = %legacy, "no index metadata to migrate");
        }
        Err(e) => {
            tracing::warn!(namespace = %legacy, error = %e, "legacy index metadata unreadable");
        }
    }

    match cache.delete_namespace(legacy).await {
        Ok(()) => tracing::info!(namespace = %legacy, "removed legacy cache namespace"),
        Err(e) => tracing::warn!(namespace = %legacy, error = %e, "failed to remove legacy namespace"),
    }
}

/// Copy one key between namespaces unless the destination already holds it —
/// newer data is never overwritten with older.
async fn copy_if_absent(cache: &BlobCache, from: &str, to: &str, key: &str) {
    match cache.get(to, key).await {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(key, error = %e, "destination unreadable, skipping copy");
            return;
        }
    }
    match cache.get(from, key).await {
        Ok(Some(bytes)) => {
            if let Err(e) = cache.put(to, key, &bytes).await {
                tracing::warn!(key, error = %e, "failed to copy legacy entry");
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(key, error = %e, "legacy entry unreadable, skipping copy");
        }
    }
}

fn is_versioned_name(namespace: &str) -> bool {
    namespace
        .strip_prefix(NAMESPACE_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}
