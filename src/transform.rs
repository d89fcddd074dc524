//! Export-to-record transformation.
//!
//! Converts a raw conversation export document (the `conversations.json`
//! shipped inside a chat archive) into a flat, `created_at`-ascending
//! sequence of [`ConversationRecord`]s. Pure: no I/O, no state across calls.

use serde::Deserialize;
use serde_json::Value;

use crate::models::{render_text, ConversationRecord, Message};

/// Errors surfaced to the user when an uploaded archive cannot be loaded.
///
/// Transform failures block loading that file only; previously loaded data
/// is never touched.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The export document is not the expected shape (top level must be an
    /// array of conversation entries) or is not valid JSON at all.
    #[error("invalid export format: {0}")]
    InvalidFormat(String),

    /// The archive container could not be read or holds no export document.
    #[error("archive unreadable: {0}")]
    Archive(String),
}

/// One conversation entry as it appears in the export. Everything is
/// optional — real exports omit fields freely and an entry must still
/// produce a record.
#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Option<f64>,
    #[serde(default)]
    update_time: Option<f64>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    /// Node graph keyed by node id. `serde_json`'s `preserve_order` feature
    /// keeps the source insertion order, which is the message order we emit.
    #[serde(default)]
    mapping: Option<serde_json::Map<String, Value>>,
}

/// Parse an export document from text and transform it.
pub fn transform_str(json: &str) -> Result<Vec<ConversationRecord>, TransformError> {
    let raw: Value =
        serde_json::from_str(json).map_err(|e| TransformError::InvalidFormat(e.to_string()))?;
    transform(&raw)
}

/// Transform a parsed export document into records.
///
/// Every entry yields exactly one record; none are discarded. A missing
/// `mapping` means an empty conversation, not an error. Output is sorted by
/// `created_at` ascending and is bit-identical across runs for the same
/// input.
pub fn transform(raw: &Value) -> Result<Vec<ConversationRecord>, TransformError> {
    let entries = raw
        .as_array()
        .ok_or_else(|| TransformError::InvalidFormat("top level is not an array".to_string()))?;

    let mut records: Vec<ConversationRecord> = Vec::with_capacity(entries.len());
    for entry in entries {
        let conv: RawConversation = serde_json::from_value(entry.clone())
            .map_err(|e| TransformError::InvalidFormat(e.to_string()))?;
        records.push(record_from(conv));
    }

    records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(records)
}

fn record_from(conv: RawConversation) -> ConversationRecord {
    let messages = conv
        .mapping
        .as_ref()
        .map(collect_messages)
        .unwrap_or_default();
    let text = render_text(&messages);

    ConversationRecord {
        id: conv
            .conversation_id
            .or(conv.id)
            .unwrap_or_default(),
        title: conv.title.unwrap_or_default(),
        created_at: conv.create_time.unwrap_or(0.0) as i64,
        updated_at: conv.update_time.unwrap_or(0.0) as i64,
        messages,
        text,
    }
}

/// Flatten the node graph into messages.
///
/// Nodes without a `message` payload (roots, structural nodes) are dropped.
/// Order is the iteration order of the mapping table, not a reconstruction
/// of the parent-link tree — the graph structure does not guarantee
/// chronology and we keep the table order as-is.
fn collect_messages(mapping: &serde_json::Map<String, Value>) -> Vec<Message> {
    mapping
        .values()
        .filter_map(|node| node.get("message"))
        .filter(|message| !message.is_null())
        .map(|message| Message {
            author: message
                .pointer("/author/role")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            text: joined_parts(message),
        })
        .collect()
}

/// Space-join the string content parts. Absent parts yield an empty string,
/// never an error; non-string parts (multimodal payloads) contribute
/// nothing.
fn joined_parts(message: &Value) -> String {
    message
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_export() -> String {
        r#"[
            {
                "title": "Trip",
                "create_time": 100.5,
                "update_time": 200.0,
                "conversation_id": "A",
                "mapping": {
                    "root": {"message": null, "parent": null, "children": ["n1"]},
                    "n1": {"message": {"author": {"role": "user"}, "content": {"parts": ["plan a", "trip"]}}, "parent": "root"},
                    "n2": {"message": {"author": {"role": "assistant"}, "content": {"parts": ["sure"]}}, "parent": "n1"}
                }
            },
            {
                "title": "Budget",
                "create_time": 50,
                "update_time": 300,
                "conversation_id": "B",
                "mapping": {
                    "n1": {"message": {"author": {"role": "user"}, "content": {"parts": ["spreadsheet"]}}}
                }
            }
        ]"#
        .to_string()
    }

    #[test]
    fn test_transform_basic() {
        let records = transform_str(&sample_export()).unwrap();
        assert_eq!(records.len(), 2);

        // Sorted by created_at ascending: B (50) before A (100).
        assert_eq!(records[0].id, "B");
        assert_eq!(records[1].id, "A");

        let a = &records[1];
        assert_eq!(a.title, "Trip");
        assert_eq!(a.created_at, 100);
        assert_eq!(a.updated_at, 200);
        assert_eq!(a.messages.len(), 2);
        assert_eq!(a.messages[0].author, "user");
        assert_eq!(a.messages[0].text, "plan a trip");
        assert_eq!(a.text, "[user] plan a trip\n[assistant] sure");
    }

    #[test]
    fn test_messageless_nodes_are_dropped() {
        let records = transform_str(&sample_export()).unwrap();
        // The root node in A carries no message payload.
        assert_eq!(records[1].messages.len(), 2);
    }

    #[test]
    fn test_missing_mapping_is_empty_conversation() {
        let json = r#"[{"title": "Empty", "conversation_id": "E", "create_time": 1, "update_time": 1}]"#;
        let records = transform_str(json).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].messages.is_empty());
        assert_eq!(records[0].text, "");
    }

    #[test]
    fn test_missing_parts_is_empty_text() {
        let json = r#"[{
            "conversation_id": "P",
            "mapping": {"n": {"message": {"author": {"role": "tool"}, "content": {}}}}
        }]"#;
        let records = transform_str(json).unwrap();
        assert_eq!(records[0].messages[0].text, "");
        assert_eq!(records[0].messages[0].author, "tool");
    }

    #[test]
    fn test_non_string_parts_are_skipped() {
        let json = r#"[{
            "conversation_id": "M",
            "mapping": {"n": {"message": {"author": {"role": "user"}, "content": {"parts": ["text", {"asset": "img"}, "more"]}}}}
        }]"#;
        let records = transform_str(json).unwrap();
        assert_eq!(records[0].messages[0].text, "text more");
    }

    #[test]
    fn test_top_level_not_array_fails() {
        let err = transform_str(r#"{"not": "an array"}"#).unwrap_err();
        assert!(matches!(err, TransformError::InvalidFormat(_)));
    }

    #[test]
    fn test_unparseable_json_fails() {
        let err = transform_str("{{{").unwrap_err();
        assert!(matches!(err, TransformError::InvalidFormat(_)));
    }

    #[test]
    fn test_deterministic() {
        let json = sample_export();
        let first = transform_str(&json).unwrap();
        let second = transform_str(&json).unwrap();
        assert_eq!(first, second);
    }
}
