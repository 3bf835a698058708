use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts, HeaderMap};
use peer_wiki_core::auth::session::SESSION_COOKIE;
use peer_wiki_core::rights::{Action, Rights};
use peer_wiki_core::users::User;
use peer_wiki_core::WikiError;

use super::error::ApiError;
use super::AppState;

/// The user behind a request: the session holder, or the guest account.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: User,
}

impl AuthContext {
    pub fn can(&self, id: &str, action: Action) -> bool {
        Rights::check_entry(id, &self.user.rights, action)
    }

    pub fn require(&self, id: &str, action: Action) -> Result<(), ApiError> {
        if self.can(id, action) {
            Ok(())
        } else {
            Err(WikiError::Forbidden.into())
        }
    }
}

/// Session token from the `wiki_session` cookie or a Bearer header.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value);
    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    })
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let wiki = &state.wiki;
        let user = session_token(&parts.headers)
            .and_then(|token| wiki.sessions.verify(token))
            .and_then(|claims| wiki.users.get(&claims.sub));
        match user.or_else(|| wiki.users.guest()) {
            Some(user) => Ok(Self { user }),
            None => Err(WikiError::NotFound("guest account".into()).into()),
        }
    }
}

/// Peer address of the TCP connection. Forwarding headers are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_beats_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers), Some("from-header"));
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; wiki_session=from-cookie"),
        );
        assert_eq!(session_token(&headers), Some("from-cookie"));
    }
}
