//! Idempotency Keys
//!
//! Reward credits are keyed so the external ledger can recognise a retried
//! call for the same match and player.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type KeyHash = [u8; 32];

/// Incremental hasher with a domain separator.
pub struct KeyHasher {
    hasher: Sha256,
}

impl KeyHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Update with a UUID (16 bytes).
    #[inline]
    pub fn update_uuid(&mut self, uuid: &[u8; 16]) {
        self.hasher.update(uuid);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> KeyHash {
        self.hasher.finalize().into()
    }
}

/// Idempotency key for the match-end credit of one player.
///
/// A room hosts a single match, so (room, player) identifies the credit.
pub fn reward_key(room_id: &[u8; 16], player_id: &[u8; 16]) -> String {
    let mut hasher = KeyHasher::new(b"STOP_ARENA_REWARD_V1");
    hasher.update_uuid(room_id);
    hasher.update_uuid(player_id);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_key_stable() {
        let a = reward_key(&[1; 16], &[2; 16]);
        let b = reward_key(&[1; 16], &[2; 16]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_reward_key_distinct() {
        assert_ne!(reward_key(&[1; 16], &[2; 16]), reward_key(&[1; 16], &[3; 16]));
        assert_ne!(reward_key(&[1; 16], &[2; 16]), reward_key(&[2; 16], &[1; 16]));
    }

    #[test]
    fn test_domain_separation() {
        let mut a = KeyHasher::new(b"A");
        a.update_uuid(&[7; 16]);
        let mut b = KeyHasher::new(b"B");
        b.update_uuid(&[7; 16]);
        assert_ne!(a.finalize(), b.finalize());
    }
}
