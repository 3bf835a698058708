use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::users::{Provider, User};

pub const SESSION_COOKIE: &str = "wiki_session";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub provider: Provider,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 keys for session tokens.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            provider: user.provider,
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Claims of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .ok()
            .map(|d| d.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserStore;

    #[test]
    fn issue_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let user = UserStore::open(dir.path().join("users.json"))
            .unwrap()
            .find_or_create_portal_user("u1", "hku.hk")
            .unwrap();
        let keys = SessionKeys::new(b"secret", Duration::from_secs(60));
        let token = keys.issue(&user).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.provider, Provider::Hku);

        let other = SessionKeys::new(b"different", Duration::from_secs(60));
        assert!(other.verify(&token).is_none());
        assert!(keys.verify("not-a-jwt").is_none());
    }

    #[test]
    fn expired_session_rejected() {
        let keys = SessionKeys::new(b"secret", Duration::from_secs(60));
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "x".into(),
            email: "x@hku.hk".into(),
            provider: Provider::Hku,
            iat: now - 120,
            exp: now - 60,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert!(keys.verify(&token).is_none());
    }
}
