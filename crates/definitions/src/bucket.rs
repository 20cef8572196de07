//! Deterministic random-bucket inclusion. Hash-based so re-evaluation of
//! the same (segment, user) pair always lands in the same bucket.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Whether `user_id` falls inside the first `percent` (0–100) of buckets
/// for `segment_id`. Buckets have 0.01% granularity.
pub fn in_random_bucket(segment_id: Uuid, user_id: &str, percent: f64) -> bool {
    if percent >= 100.0 {
        return true;
    }
    if percent <= 0.0 {
        return false;
    }
    let mut hasher = Sha256::new();
    hasher.update(segment_id.as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let bucket = u64::from_be_bytes(prefix) % 10_000;
    (bucket as f64) < percent * 100.0
}
