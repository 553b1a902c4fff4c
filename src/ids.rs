//! Injected UUID source.
//!
//! Outbox entry IDs and deduplication refs come from a single [`IdSource`]
//! owned by the stream. The source can be reseeded - the push socket does so
//! with the websocket URL on every reconnect - and is never process-global.

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use uuid::Uuid;

/// Seedable UUID generator.
pub struct IdSource {
    rng: Mutex<SmallRng>,
}

impl IdSource {
    /// Create a source seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Create a source with a fixed seed (deterministic, for tests).
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    /// Reseed from an arbitrary entropy string.
    pub fn reseed(&self, entropy: &str) {
        let digest = Sha256::digest(entropy.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut guard = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        *guard = SmallRng::from_seed(seed);
    }

    /// Produce the next random UUID.
    pub fn next_id(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        {
            let mut guard = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            guard.fill_bytes(&mut bytes);
        }
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::new()
    }
}
