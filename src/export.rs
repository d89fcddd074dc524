//! Selection-based export of conversation records.
//!
//! Produces a JSON document of chosen records for sharing or downstream
//! processing, in record-set order.

use anyhow::{bail, Result};

use crate::models::ConversationRecord;

/// Serialize the selected records as pretty JSON, preserving record-set
/// order. Every requested id must exist.
pub fn export_selection(records: &[ConversationRecord], ids: &[String]) -> Result<String> {
    for id in ids {
        if !records.iter().any(|r| &r.id == id) {
            bail!("No conversation with id '{}'", id);
        }
    }

    let selected: Vec<&ConversationRecord> = records
        .iter()
        .filter(|r| ids.iter().any(|id| id == &r.id))
        .collect();

    Ok(serde_json::to_string_pretty(&selected)?)
}
