//! Property-based tests using proptest.
//!
//! These verify invariants that should hold for all inputs, helping catch
//! edge cases that unit tests might miss.

use chrono::{SecondsFormat, TimeZone, Utc};
use kstream::meta::{parse_meta, parse_time, serialize_meta, serialize_meta_with_ref};
use kstream::queue::TransactionQueue;
use kstream::store::{Boxes, StoredState};
use kstream::transaction::{ApiTransaction, Transaction, TransactionFilter};
use proptest::prelude::*;
use std::collections::BTreeMap;

// 2000-01-01T00:00:00Z and 2399-12-31T23:59:59Z as epoch seconds.
const TIME_MIN: i64 = 946_684_800;
const TIME_MAX: i64 = 13_569_465_599;

fn tx(id: i64) -> Transaction {
    Transaction::decode(ApiTransaction {
        id,
        from: Some("kaaa".to_string()),
        to: "kbbb".to_string(),
        value: 1,
        time: "2024-06-01T10:00:00.000Z".to_string(),
        kind: "transfer".to_string(),
        name: None,
        metadata: None,
    })
}

// =============================================================================
// CommonMeta Round-Trip
// =============================================================================

proptest! {
    /// parse(serialize(m)) == m for maps with clean keys (no `;`/`=`) and
    /// clean values (no `;`).
    #[test]
    fn meta_roundtrip(
        entries in prop::collection::btree_map(
            "[a-z0-9_.]{1,12}",
            "[a-zA-Z0-9 =._-]{0,16}",
            0..8,
        )
    ) {
        let map: BTreeMap<String, String> = entries;
        prop_assert_eq!(parse_meta(&serialize_meta(&map)), map);
    }

    /// The ref tag always survives serialization, wins over any user `ref`
    /// key, and parses back out.
    #[test]
    fn meta_ref_tag_survives(
        entries in prop::collection::btree_map(
            "[a-z0-9_.]{1,12}",
            "[a-zA-Z0-9 ._-]{0,16}",
            0..8,
        ),
        ref_id in "[a-f0-9-]{8,36}",
    ) {
        let encoded = serialize_meta_with_ref(&entries, &ref_id);
        let parsed = parse_meta(&encoded);
        prop_assert_eq!(parsed.get("ref").map(String::as_str), Some(ref_id.as_str()));
    }

    /// Parsing never panics on arbitrary input.
    #[test]
    fn meta_parse_total(raw in ".{0,200}") {
        let _ = parse_meta(&raw);
    }
}

// =============================================================================
// Time Parsing
// =============================================================================

proptest! {
    /// parse_time is monotone over the supported range.
    #[test]
    fn parse_time_monotone(
        a in TIME_MIN..TIME_MAX,
        b in TIME_MIN..TIME_MAX,
    ) {
        let fmt = |secs: i64| {
            Utc.timestamp_opt(secs, 0)
                .unwrap()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        };
        let ta = parse_time(&fmt(a)).unwrap();
        let tb = parse_time(&fmt(b)).unwrap();
        prop_assert_eq!(a.cmp(&b), ta.cmp(&tb));
    }

    /// Parsing never panics on arbitrary input.
    #[test]
    fn parse_time_total(raw in ".{0,64}") {
        let _ = parse_time(&raw);
    }
}

// =============================================================================
// Queue Gap-Freedom
// =============================================================================

proptest! {
    /// Pushing an arbitrary overlapping page partition delivers every ID
    /// exactly once, in order.
    #[test]
    fn queue_page_partition_gap_free(
        total in 1usize..120,
        page_size in 2usize..20,
    ) {
        let ids: Vec<i64> = (0..total as i64).collect();
        let mut queue = TransactionQueue::new(TransactionFilter::everything(), -1);

        // First page unanchored, then overlap-by-one pages.
        let mut cursor = 0usize;
        let mut anchor: Option<i64> = None;
        while cursor < ids.len() {
            let start = if anchor.is_some() { cursor - 1 } else { cursor };
            let end = (start + page_size).min(ids.len());
            let page: Vec<Transaction> = ids[start..end].iter().map(|&id| tx(id)).collect();
            prop_assert!(queue.try_push_page(&page, anchor));
            anchor = Some(ids[end - 1]);
            cursor = end;
        }

        let mut popped = Vec::new();
        while let Some(t) = queue.pop() {
            popped.push(t.id);
        }
        prop_assert_eq!(popped, ids);
    }

    /// A page that skips the anchor is always rejected and mutates nothing.
    #[test]
    fn queue_rejects_gapped_page(
        last_seen in 0i64..1000,
        gap in 2i64..50,
        len in 1usize..10,
    ) {
        let mut queue = TransactionQueue::new(TransactionFilter::everything(), last_seen);
        let first = last_seen + gap;
        let page: Vec<Transaction> = (first..first + len as i64).map(tx).collect();
        prop_assert!(!queue.try_push_page(&page, Some(last_seen)));
        prop_assert_eq!(queue.last_seen_id(), last_seen);
        prop_assert!(queue.is_empty());
    }

    /// Live pushes are accepted exactly when contiguous.
    #[test]
    fn queue_live_push_contiguity(last_seen in 0i64..1000, id in 0i64..2000) {
        let mut queue = TransactionQueue::new(TransactionFilter::everything(), last_seen);
        let accepted = queue.try_push_transaction(&tx(id));
        prop_assert_eq!(accepted, id == last_seen + 1);
    }
}

// =============================================================================
// State Document Round-Trip
// =============================================================================

proptest! {
    /// The stored state survives a serde round-trip exactly.
    #[test]
    fn stored_state_roundtrip(
        last_popped_id in -1i64..1_000_000,
        revision in 0u64..1_000_000,
        include_mined in any::<bool>(),
        address in prop::option::of("[a-z0-9]{10}"),
    ) {
        let state = StoredState {
            endpoint: "https://node.test".to_string(),
            include_mined,
            address,
            last_popped_id,
            committed: Boxes {
                revision,
                inbox: Some(tx(last_popped_id.max(0))),
                outbox: Vec::new(),
            },
            prepared: None,
        };
        let bytes = serde_json::to_vec(&state).unwrap();
        let back: StoredState = serde_json::from_slice(&bytes).unwrap();
        prop_assert_eq!(back, state);
    }
}
