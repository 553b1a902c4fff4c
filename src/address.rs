//! Address derivation and refund construction.
//!
//! The v2 address scheme folds a double-SHA-256 chain of the private key
//! into nine base-36 characters behind a one-character prefix. The chain
//! walk consumes hash bytes as indices into a table of precomputed protein
//! bytes, re-hashing whenever an index lands on a spent slot.

use crate::meta::RETURN_KEY;
use crate::transaction::{SendRequest, Transaction};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn double_sha256_hex(input: &str) -> String {
    sha256_hex(&sha256_hex(input))
}

/// Map a byte onto the base-36 alphabet, folding by sevens.
fn hex_to_base36(byte: u8) -> char {
    let code = 48 + byte / 7;
    let code = if code + 39 > 122 {
        101
    } else if code > 57 {
        code + 39
    } else {
        code
    };
    code as char
}

/// Derive the v2 address for a private key.
///
/// Deterministic; the same key always yields the same ten-character
/// address.
pub fn make_v2_address(private_key: &str, prefix: char) -> String {
    let mut protein: [Option<u8>; 9] = [None; 9];
    let mut hash = double_sha256_hex(private_key);

    for slot in protein.iter_mut() {
        let byte = u8::from_str_radix(&hash[0..2], 16).unwrap_or(0);
        *slot = Some(byte);
        hash = double_sha256_hex(&hash);
    }

    let mut address = String::with_capacity(10);
    address.push(prefix);

    let mut picked = 0usize;
    while picked < 9 {
        let index = usize::from(u8::from_str_radix(&hash[2 * picked..2 * picked + 2], 16).unwrap_or(0)) % 9;
        match protein[index].take() {
            Some(byte) => {
                address.push(hex_to_base36(byte));
                picked += 1;
            }
            None => {
                hash = sha256_hex(&hash);
            }
        }
    }

    address
}

/// Build a refund for an observed transfer.
///
/// The refund goes to the `return=` metadata address when the sender named
/// one, otherwise back to the sending address. Returns `None` when the
/// transfer has no viable return path (mining rewards have no sender).
pub fn make_refund_for(
    private_key: &str,
    own_address: &str,
    transfer: &Transaction,
    meta: Option<BTreeMap<String, String>>,
    ud: Option<serde_json::Value>,
) -> Option<SendRequest> {
    let recipient = transfer
        .meta
        .get(RETURN_KEY)
        .cloned()
        .or_else(|| transfer.from.clone())?;

    // Refunding ourselves would bounce forever.
    if recipient == own_address {
        return None;
    }

    Some(SendRequest {
        to: recipient,
        amount: transfer.value,
        private_key: private_key.to_string(),
        meta: meta.unwrap_or_default(),
        ud,
    })
}
