//! HTTP surface of the wiki.

pub mod auth_middleware;
pub mod error;
mod login;
mod pages;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use peer_wiki_core::Wiki;
use tower_http::trace::TraceLayer;

pub use auth_middleware::{AuthContext, ClientAddr};
pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub wiki: Arc<Wiki>,
}

pub fn router(wiki: Arc<Wiki>) -> Router {
    let state = AppState { wiki };
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/login", post(login::local_login))
        .route("/login/portal", get(login::portal_redirect))
        .route("/portal-login/get-login-token", post(login::get_login_token))
        .route("/portal-login/{token}", get(login::portal_login))
        .route("/logout", get(login::logout))
        .route("/all", get(pages::all_entries))
        .route("/tree", get(pages::tree))
        .route("/search", get(pages::search))
        .route("/edit/{*path}", get(pages::edit_page).put(pages::update_page))
        .route("/create/{*path}", get(pages::create_form).put(pages::create_page))
        .route("/createcheck/{*path}", get(pages::create_check))
        .route("/source/{*path}", get(pages::source))
        .route("/hist", post(pages::history_diff))
        .route("/hist/{*path}", get(pages::history))
        .route("/", get(pages::home))
        .route(
            "/{*path}",
            get(pages::view)
                .put(pages::move_page)
                .delete(pages::delete_page),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
