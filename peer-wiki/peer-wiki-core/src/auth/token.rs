//! Single-use login tokens minted by the portal handshake.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthToken {
    pub id: String,
    pub token: String,
    pub expiry: DateTime<Utc>,
    pub is_authenticated: bool,
    pub uid: String,
}

impl AuthToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}

/// In-memory token table keyed by the token string. Tokens are removed
/// when read, so each one can be redeemed at most once.
#[derive(Default)]
pub struct TokenStore {
    tokens: Mutex<HashMap<String, AuthToken>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn random_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn mint(&self, uid: &str, ttl: Duration) -> AuthToken {
        let token = AuthToken {
            id: Uuid::new_v4().to_string(),
            token: Self::random_token(),
            expiry: Utc::now() + ttl,
            is_authenticated: true,
            uid: uid.to_string(),
        };
        let mut tokens = self.tokens.lock();
        let now = Utc::now();
        tokens.retain(|_, t| !t.is_expired(now));
        tokens.insert(token.token.clone(), token.clone());
        token
    }

    /// Remove and return the token, whatever its state.
    pub fn take(&self, token: &str) -> Option<AuthToken> {
        self.tokens.lock().remove(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, token: AuthToken) {
        self.tokens.lock().insert(token.token.clone(), token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_single_use() {
        let store = TokenStore::new();
        let minted = store.mint("u1", Duration::seconds(10));
        assert_eq!(minted.token.len(), 64);
        assert!(minted.is_authenticated);
        assert_eq!(store.take(&minted.token), Some(minted.clone()));
        assert!(store.take(&minted.token).is_none());
    }

    #[test]
    fn minting_purges_expired() {
        let store = TokenStore::new();
        store.mint("old", Duration::seconds(-1));
        store.mint("new", Duration::seconds(10));
        assert_eq!(store.len(), 1);
    }
}
