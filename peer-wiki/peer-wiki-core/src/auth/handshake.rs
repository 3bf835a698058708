//! Federated login through the campus identity agent.
//!
//! The agent authenticates the student on its side, then posts
//! `{uid, s}` where `s = hex(sha256(uid || secret))`. A matching
//! signature mints a short-lived token that the browser redeems at
//! `/portal-login/{token}`.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use ring::digest;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::auth::token::TokenStore;
use crate::config::PortalConfig;
use crate::error::{Result, WikiError};

pub fn signature(uid: &str, secret: &str) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(uid.as_bytes());
    ctx.update(secret.as_bytes());
    hex::encode(ctx.finish())
}

pub struct PortalHandshake {
    config: PortalConfig,
    tokens: Arc<TokenStore>,
}

impl PortalHandshake {
    pub fn new(config: PortalConfig, tokens: Arc<TokenStore>) -> Self {
        Self { config, tokens }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn agent_url(&self) -> &str {
        &self.config.agent_url
    }

    /// Verify the agent's signature and mint a login token for `uid`.
    pub fn issue_token(&self, uid: &str, s: &str, peer: IpAddr) -> Result<String> {
        if !self.config.trusted_agents.is_empty() && !self.config.trusted_agents.contains(&peer) {
            warn!(%peer, "handshake from untrusted address");
            return Err(WikiError::UntrustedAgent);
        }
        let expected = signature(uid, &self.config.agent_secret);
        let given = s.trim().to_ascii_lowercase();
        let matches: bool = expected.as_bytes().ct_eq(given.as_bytes()).into();
        if uid.is_empty() || self.config.agent_secret.is_empty() || !matches {
            warn!(%peer, "handshake signature mismatch");
            return Err(WikiError::HandshakeSignatureMismatch);
        }
        let ttl = chrono::Duration::from_std(self.config.token_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        let token = self.tokens.mint(uid, ttl);
        info!(uid, "portal login token issued");
        Ok(token.token)
    }

    /// Consume a token and return the uid it was minted for.
    pub fn redeem(&self, token: &str) -> Result<String> {
        let record = self
            .tokens
            .take(token)
            .ok_or(WikiError::TokenExpiredOrMissing)?;
        if !record.is_authenticated || record.is_expired(Utc::now()) {
            return Err(WikiError::TokenExpiredOrMissing);
        }
        Ok(record.uid)
    }
}
