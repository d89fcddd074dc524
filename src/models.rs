//! Core data models for convodex.
//!
//! These types represent the normalized conversation records, ranked search
//! results, and persisted index metadata that flow through the ingestion and
//! search pipeline.

use serde::{Deserialize, Serialize};

/// One message inside a conversation, already projected out of the export's
/// node graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role label from the export (`user`, `assistant`, `system`, `tool`, ...).
    /// Open set — unknown labels pass through unchanged.
    pub author: String,
    /// Space-joined string content parts of the message.
    pub text: String,
}

/// A normalized conversation: one record per export entry, immutable once
/// built.
///
/// Serialized field names match the persisted cache format, which predates
/// this implementation, so previously cached record sets stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Opaque identifier from the export, unique within a record set.
    pub id: String,
    /// Display title; not guaranteed unique.
    pub title: String,
    /// Epoch seconds. `updated_at >= created_at` is expected but malformed
    /// exports may violate it; neither is enforced.
    pub created_at: i64,
    pub updated_at: i64,
    /// Messages in mapping-table order.
    pub messages: Vec<Message>,
    /// Derived from `messages` at construction time (see [`render_text`]) and
    /// persisted alongside them. The pair is only ever written together.
    pub text: String,
}

/// Render the searchable text body for a record: `[author] text` lines,
/// newline-joined, in message order.
pub fn render_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}] {}", m.author, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// Relevance score. `None` only for results that never went through a
    /// scoring path.
    pub score: Option<f64>,
}

/// How query terms are matched against records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Engine-ranked matching: prefix and edit-distance tolerant.
    Fuzzy,
    /// Case-insensitive substring match against `title` and `text`, bypassing
    /// the index entirely.
    Exact,
}

/// Result ordering, selectable independently of [`MatchMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// Score descending, ties broken by `updated_at` descending.
    Relevance,
    /// `updated_at` descending, ties broken by score descending.
    Updated,
    /// `created_at` descending, ties broken by score descending.
    Created,
}

impl SortBy {
    /// Parse a CLI-facing sort name. Returns `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relevance" => Some(SortBy::Relevance),
            "updated" => Some(SortBy::Updated),
            "created" => Some(SortBy::Created),
            _ => None,
        }
    }
}

/// Persisted metadata describing one serialized index artifact.
///
/// An artifact is valid for exactly one fingerprint and one set of build
/// options; a mismatch on either is a full cache miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexArtifactMeta {
    /// Fingerprint of the record set the artifact was built from.
    pub fingerprint: String,
    /// Cache key holding the serialized index text.
    pub storage_key: String,
    /// Epoch seconds at persist time.
    pub created_at: i64,
    /// Build options recorded at persist time; deserialization requires an
    /// exact match.
    pub index_options: crate::engine::IndexOptions,
}

/// Format a Unix timestamp as ISO 8601 for display.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
