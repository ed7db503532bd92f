//! API key issuance and lookup.
//!
//! Keys are opaque `sk_`-prefixed random strings, returned exactly once on
//! account creation. Only the SHA-256 hash is stored; a warm in-memory cache
//! maps hash -> account id so steady-state auth never touches the store.

use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("sk_{}", hex::encode(bytes))
}

pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[derive(Default)]
pub struct ApiKeyCache {
    by_hash: DashMap<String, Uuid>,
}

impl ApiKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key_hash: &str) -> Option<Uuid> {
        self.by_hash.get(key_hash).map(|entry| *entry)
    }

    pub fn insert(&self, key_hash: String, account_id: Uuid) {
        self.by_hash.insert(key_hash, account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_and_prefixed() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with("sk_"));
        assert_eq!(a.len(), 3 + 64);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_and_hides_key() {
        let key = generate_api_key();
        assert_eq!(hash_api_key(&key), hash_api_key(&key));
        assert_ne!(hash_api_key(&key), key);
    }

    #[test]
    fn cache_round_trip() {
        let cache = ApiKeyCache::new();
        let id = Uuid::new_v4();
        let hash = hash_api_key("sk_test");
        assert!(cache.get(&hash).is_none());
        cache.insert(hash.clone(), id);
        assert_eq!(cache.get(&hash), Some(id));
    }
}
