//! Fuzz target for timestamp parsing.
//!
//! `parse_time` must never panic on arbitrary input.

#![no_main]

use kstream::meta::parse_time;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|raw: &str| {
    let _ = parse_time(raw);
});
