//! CommonMeta metadata codec and timestamp parsing.
//!
//! Transaction metadata is a flat `k1=v1;k2=v2` string. Parsing is total:
//! pieces without an `=` are dropped, the split on `=` is at the first
//! occurrence, and the last occurrence of a key wins. Serialization emits
//! keys in map order (the map is a `BTreeMap`, so output is deterministic).
//!
//! `parse_meta(serialize_meta(m)) == m` holds for any map whose keys contain
//! no `;` or `=` and whose values contain no `;`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Metadata key carrying the outbox deduplication tag.
pub const REF_KEY: &str = "ref";

/// Metadata key naming the address a refund should be returned to.
pub const RETURN_KEY: &str = "return";

/// Parse a CommonMeta string into a key/value map.
///
/// Split on `;`, then split each piece on the *first* `=`. Pieces without
/// an `=` and empty pairs are dropped. The last occurrence of a key wins.
pub fn parse_meta(raw: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for piece in raw.split(';') {
        let Some((key, value)) = piece.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), value.to_string());
    }
    map
}

/// Serialize a key/value map as a CommonMeta string.
pub fn serialize_meta(map: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if !out.is_empty() {
            out.push(';');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Serialize a map and append the `ref=<uuid>` deduplication tag.
///
/// The tag always comes last and overrides any `ref` key in the map.
pub fn serialize_meta_with_ref(map: &BTreeMap<String, String>, ref_id: &str) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if key == REF_KEY {
            continue;
        }
        if !out.is_empty() {
            out.push(';');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    if !out.is_empty() {
        out.push(';');
    }
    out.push_str(REF_KEY);
    out.push('=');
    out.push_str(ref_id);
    out
}

/// Parse an ISO-8601 UTC timestamp as reported by the node.
///
/// Returns `None` for anything that is not a valid RFC 3339 instant.
/// Monotone: for any two valid timestamps `a <= b` as instants,
/// `parse_time(a) <= parse_time(b)`.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
