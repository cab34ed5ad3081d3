//! Seedable id and sort key generation.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LABEL_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Lower bound (inclusive) of freshly generated sort keys.
pub const SORT_SEED_MIN: i64 = 1_000_000_000;

/// Generates ids and initial sort keys.
///
/// Seed it for reproducible trees in tests.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    rng: StdRng,
}

impl IdGenerator {
    /// Creates a deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a generator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Generates a node id: `<ms hex>.<random hex>`.
    pub fn node_id(&mut self) -> String {
        format!("{:x}.{:016x}", now_millis(), self.rng.gen::<u64>())
    }

    /// Generates a label id: `tag.<12 chars>.<ms hex>`.
    pub fn label_id(&mut self) -> String {
        let tag: String = (0..12)
            .map(|_| LABEL_ALPHABET[self.rng.gen_range(0..LABEL_ALPHABET.len())] as char)
            .collect();
        format!("tag.{}.{:x}", tag, now_millis())
    }

    /// Generates an annotation id (random UUID).
    pub fn annotation_id(&mut self) -> String {
        let bytes: [u8; 16] = self.rng.gen();
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string()
    }

    /// Generates an initial sort key.
    pub fn sort_value(&mut self) -> i64 {
        self.rng.gen_range(SORT_SEED_MIN..i64::from(i32::MAX))
    }

    /// Generates a client session id: `s--<ms>--<random>`.
    pub fn session_id(&mut self) -> String {
        format!(
            "s--{}--{}",
            now_millis(),
            self.rng.gen_range(1_000_000_000u64..10_000_000_000u64)
        )
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
