use sha2::{Digest, Sha256};

/// Decide whether `identifier` falls inside a percentage rollout bucket.
///
/// Pure and stateless: the same identifier always lands in the same
/// bucket, so a gradual rollout is monotonic (raising the percentage only
/// adds identifiers, never removes them).
pub fn in_rollout(identifier: &str, percentage: u8) -> bool {
    if percentage == 0 {
        return false;
    }
    if percentage >= 100 {
        return true;
    }

    let digest = Sha256::digest(identifier.as_bytes());
    // First two bytes give a stable bucket in 0..100.
    let bucket = u16::from_be_bytes([digest[0], digest[1]]) % 100;
    bucket < percentage as u16
}
