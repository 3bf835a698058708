//! Local and portal login endpoints.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use peer_wiki_core::auth::session::SESSION_COOKIE;
use peer_wiki_core::users::User;
use peer_wiki_core::WikiError;
use serde::Deserialize;
use tracing::{info, warn};

use super::{ApiResult, AppState, ClientAddr};

fn session_cookie(value: &str, max_age: u64) -> String {
    format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}")
}

/// Set the session cookie and send the browser home.
fn start_session(state: &AppState, user: &User) -> ApiResult<Response> {
    let token = state.wiki.sessions.issue(user)?;
    let cookie = session_cookie(&token, state.wiki.sessions.ttl().as_secs());
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response())
}

#[derive(Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
}

pub async fn local_login(
    State(state): State<AppState>,
    ClientAddr(ip): ClientAddr,
    Form(form): Form<LoginForm>,
) -> ApiResult<Response> {
    let wiki = &state.wiki;
    if !wiki.config.local_auth {
        return Err(WikiError::NotFound("/login".into()).into());
    }
    let key = ip.to_string();
    wiki.throttle.check(&key)?;
    match wiki.users.verify_local(form.email.trim(), &form.password) {
        Ok(user) => {
            wiki.throttle.success(&key);
            info!(email = %user.email, "local login");
            start_session(&state, &user)
        }
        Err(err) => {
            wiki.throttle.failure(&key);
            Err(err.into())
        }
    }
}

pub async fn portal_redirect(State(state): State<AppState>) -> ApiResult<Redirect> {
    let portal = state
        .wiki
        .portal
        .as_ref()
        .ok_or_else(|| WikiError::NotFound("/login/portal".into()))?;
    Ok(Redirect::to(portal.agent_url()))
}

#[derive(Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    s: String,
}

/// Called by the identity agent, not the browser. Replies with the bare
/// token as text.
pub async fn get_login_token(
    State(state): State<AppState>,
    ClientAddr(ip): ClientAddr,
    Form(req): Form<TokenRequest>,
) -> ApiResult<String> {
    let portal = state
        .wiki
        .portal
        .as_ref()
        .ok_or(WikiError::HandshakeSignatureMismatch)?;
    Ok(portal.issue_token(&req.uid, &req.s, ip)?)
}

pub async fn portal_login(
    State(state): State<AppState>,
    ClientAddr(ip): ClientAddr,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let wiki = &state.wiki;
    let portal = wiki
        .portal
        .as_ref()
        .ok_or(WikiError::TokenExpiredOrMissing)?;
    let key = ip.to_string();
    wiki.throttle.check(&key)?;
    let uid = match portal.redeem(&token) {
        Ok(uid) => uid,
        Err(err) => {
            warn!(%ip, "portal token rejected");
            wiki.throttle.failure(&key);
            return Err(err.into());
        }
    };
    let user = wiki
        .users
        .find_or_create_portal_user(&uid, &portal.config().email_domain)?;
    wiki.throttle.success(&key);
    info!(email = %user.email, "portal login");
    start_session(&state, &user)
}

pub async fn logout() -> Response {
    (
        [(header::SET_COOKIE, session_cookie("", 0))],
        Redirect::to("/"),
    )
        .into_response()
}
