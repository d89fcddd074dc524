//! Content fingerprinting for cached artifacts.
//!
//! A fingerprint identifies a record set by its `(id, updated_at)` multiset
//! only: message bodies do not contribute, so an edit that does not touch
//! `updated_at` keeps the fingerprint stable. Collisions are accepted
//! cache-staleness risk, not corrected.

use crate::models::ConversationRecord;

/// Sentinel fingerprint for an empty record set.
pub const EMPTY_FINGERPRINT: &str = "empty";

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Compute the order-independent fingerprint of a record set.
///
/// One token `"<id>:<updated_at>"` per record, sorted lexicographically so
/// input order never matters, joined and hashed with 32-bit FNV-1a, rendered
/// as eight lowercase hex digits.
pub fn fingerprint(records: &[ConversationRecord]) -> String {
    if records.is_empty() {
        return EMPTY_FINGERPRINT.to_string();
    }

    let mut tokens: Vec<String> = records
        .iter()
        .map(|r| format!("{}:{}", r.id, r.updated_at))
        .collect();
    tokens.sort_unstable();

    format!("{:08x}", fnv1a32(tokens.join("|").as_bytes()))
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
