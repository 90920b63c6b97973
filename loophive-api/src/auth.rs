//! API key generation and hashing.
//!
//! Key format: `hb_{type}_{32 hex chars}`. The raw key is returned to the
//! caller exactly once; only its SHA-256 hash and a 12-char display prefix
//! are persisted.

use rand::RngCore;
use sha2::{Digest, Sha256};

use loophive_core::KeyType;

/// SHA-256 hex digest of a raw key.
pub fn hash_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Generate a fresh API key. Returns `(raw_key, key_hash, key_prefix)`.
pub fn generate_api_key(key_type: KeyType) -> (String, String, String) {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let raw_key = format!("hb_{}_{}", key_type.as_str(), hex::encode(bytes));
    let key_hash = hash_key(&raw_key);
    let key_prefix = raw_key.chars().take(12).collect();
    (raw_key, key_hash, key_prefix)
}

/// Identity attached to every authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: String,
    pub key_id: String,
    pub key_type: KeyType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let (raw, hash, prefix) = generate_api_key(KeyType::Live);
        assert!(raw.starts_with("hb_live_"));
        assert_eq!(raw.len(), "hb_live_".len() + 32);
        assert_eq!(hash, hash_key(&raw));
        assert_eq!(prefix.len(), 12);
        assert!(raw.starts_with(&prefix));
    }

    #[test]
    fn test_keys_are_unique() {
        let (a, _, _) = generate_api_key(KeyType::Test);
        let (b, _, _) = generate_api_key(KeyType::Test);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_stable_hex_sha256() {
        let h = hash_key("hb_live_0000");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_key("hb_live_0000"));
    }
}
