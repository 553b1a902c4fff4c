//! Fuzz target for the state document decoder.
//!
//! A corrupt state file must surface as an error, never a panic.

#![no_main]

use kstream::store::StoredState;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<StoredState>(data);
});
