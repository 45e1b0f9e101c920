//! src/token.rs
//!
//! Reverse-authentication tokens: opaque, fixed-size, random byte strings.
//! A `Live` cell holds the single currently-valid token for one direction
//! of one Host; a `TokenStore` is the server-side authority that mints and
//! validates them.

use rand::RngCore;
use std::{
    collections::HashSet,
    sync::RwLock,
};

/// Byte length of a generated token.
pub const TOKEN_LEN: usize = 32;

/// One-slot mutable container holding a peer's currently-valid token.
/// Distinguishes "no token yet" from "token of length zero" by storing
/// `Option<Vec<u8>>` rather than a bare byte vector.
#[derive(Debug, Default)]
pub struct Live {
    slot: RwLock<Option<Vec<u8>>>,
}

impl Live {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    pub fn set(&self, token: Vec<u8>) {
        *self.slot.write().unwrap() = Some(token);
    }

    pub fn get(&self) -> Option<Vec<u8>> {
        self.slot.read().unwrap().clone()
    }

    pub fn has(&self) -> bool {
        self.slot.read().unwrap().is_some()
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap() = None;
    }
}

/// Authoritative mapping, on the server side, from tokens this process has
/// issued to a validity bit. `Generate` mints and records a fresh token;
/// `Validate` checks presence without revoking it — tokens have no
/// automatic expiry in the core.
#[derive(Debug, Default)]
pub struct TokenStore {
    live: RwLock<HashSet<Vec<u8>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            live: RwLock::new(HashSet::new()),
        }
    }

    /// Produces a fresh uniformly random token, inserts it into the live
    /// set, and returns it.
    pub fn generate(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; TOKEN_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        self.live.write().unwrap().insert(bytes.clone());
        bytes
    }

    /// True iff `token` is present in the live set.
    pub fn validate(&self, token: &[u8]) -> bool {
        self.live.read().unwrap().contains(token)
    }

    /// Explicit invalidation, exposed as a policy knob; not part of the
    /// core contract and not called from the handshake path.
    pub fn invalidate(&self, token: &[u8]) {
        self.live.write().unwrap().remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn generate_then_validate_succeeds() {
        let store = TokenStore::new();
        let token = store.generate();
        assert!(store.validate(&token));
    }

    #[test]
    fn validate_rejects_unknown_token() {
        let store = TokenStore::new();
        store.generate();
        assert!(!store.validate(&[0u8; TOKEN_LEN]));
    }

    #[test]
    fn validate_does_not_revoke() {
        let store = TokenStore::new();
        let token = store.generate();
        assert!(store.validate(&token));
        assert!(store.validate(&token));
    }

    #[test]
    fn successive_tokens_are_distinct() {
        let store = TokenStore::new();
        let a = store.generate();
        let b = store.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generate_is_fixed_length() {
        let store = TokenStore::new();
        assert_eq!(store.generate().len(), TOKEN_LEN);
    }

    #[test]
    fn live_cell_distinguishes_unset_from_empty() {
        let live = Live::new();
        assert!(!live.has());
        live.set(Vec::new());
        assert!(live.has());
        assert_eq!(live.get(), Some(Vec::new()));
        live.clear();
        assert!(!live.has());
    }

    #[test]
    fn concurrent_generate_and_validate_is_safe() {
        let store = Arc::new(TokenStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let token = store.generate();
                assert!(store.validate(&token));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
