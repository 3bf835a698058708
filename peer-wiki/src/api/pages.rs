use axum::extract::{Path, Query, State};
use axum::Json;
use peer_wiki_core::entries::{PageHistory, PageView};
use peer_wiki_core::index::EntryListing;
use peer_wiki_core::loader::PageData;
use peer_wiki_core::rights::Action;
use peer_wiki_core::search::SearchHit;
use peer_wiki_core::storage::Author;
use peer_wiki_core::users::User;
use peer_wiki_core::WikiError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ApiResult, AppState, AuthContext};

const SEARCH_LIMIT: usize = 20;

fn author(user: &User) -> Author {
    Author::new(&user.name, &user.email)
}

fn entry_id(state: &AppState, raw: &str) -> String {
    state.wiki.entries.paths().parse_path(raw)
}

pub async fn home(state: State<AppState>, auth: AuthContext) -> ApiResult<Json<PageView>> {
    view(state, auth, Path("home".to_string())).await
}

pub async fn view(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
) -> ApiResult<Json<PageView>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Read)?;
    Ok(Json(state.wiki.entries.view(&id).await?))
}

#[derive(Deserialize)]
pub struct MoveRequest {
    #[serde(rename = "move")]
    target: String,
}

pub async fn move_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
    Json(req): Json<MoveRequest>,
) -> ApiResult<Json<Value>> {
    let id = entry_id(&state, &path);
    let target = entry_id(&state, &req.target);
    auth.require(&id, Action::Write)?;
    auth.require(&target, Action::Write)?;
    state
        .wiki
        .entries
        .move_entry(&id, &target, &author(&auth.user))
        .await?;
    Ok(Json(json!({ "ok": true, "redirect": format!("/{target}") })))
}

pub async fn delete_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Write)?;
    let entries = &state.wiki.entries;
    if !entries.children_entries(&id).is_empty() {
        return Err(WikiError::HasChildren(id).into());
    }
    entries.remove(&id, &author(&auth.user)).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn all_entries(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Json<Vec<EntryListing>> {
    Json(state.wiki.entries.all_entries(&auth.user.rights))
}

#[derive(Deserialize)]
pub struct TreeQuery {
    #[serde(default)]
    base: String,
}

pub async fn tree(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<TreeQuery>,
) -> Json<Vec<EntryListing>> {
    let base = if query.base.trim_matches('/').is_empty() {
        String::new()
    } else {
        entry_id(&state, &query.base)
    };
    Json(state.wiki.entries.from_tree(&base, &auth.user.rights))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
}

pub async fn search(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let hits = state.wiki.search.index().search(&query.q, SEARCH_LIMIT)?;
    Ok(Json(
        hits.into_iter()
            .filter(|hit| auth.can(&hit.id, Action::Read))
            .collect(),
    ))
}

pub async fn edit_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
) -> ApiResult<Json<PageData>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Write)?;
    Ok(Json(state.wiki.entries.source(&id).await?))
}

#[derive(Deserialize)]
pub struct MarkdownBody {
    markdown: String,
}

pub async fn update_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
    Json(body): Json<MarkdownBody>,
) -> ApiResult<Json<Value>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Write)?;
    state
        .wiki
        .entries
        .update(&id, &body.markdown, &author(&auth.user))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Serialize)]
pub struct CreateForm {
    path: String,
    starter: String,
}

pub async fn create_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
) -> ApiResult<Json<CreateForm>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Write)?;
    let entries = &state.wiki.entries;
    entries.can_create_under(&id).await?;
    Ok(Json(CreateForm {
        starter: entries.get_starter(&id),
        path: id,
    }))
}

pub async fn create_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
    Json(body): Json<MarkdownBody>,
) -> ApiResult<Json<Value>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Write)?;
    state
        .wiki
        .entries
        .create(&id, &body.markdown, &author(&auth.user))
        .await?;
    Ok(Json(json!({ "ok": true, "redirect": format!("/{id}") })))
}

pub async fn create_check(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Write)?;
    state.wiki.entries.can_create_under(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn source(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
) -> ApiResult<Json<PageData>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Read)?;
    Ok(Json(state.wiki.entries.source(&id).await?))
}

pub async fn history(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(path): Path<String>,
) -> ApiResult<Json<PageHistory>> {
    let id = entry_id(&state, &path);
    auth.require(&id, Action::Read)?;
    Ok(Json(state.wiki.entries.history(&id).await?))
}

#[derive(Deserialize)]
pub struct DiffRequest {
    path: String,
    commit: String,
}

pub async fn history_diff(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<DiffRequest>,
) -> ApiResult<Json<Value>> {
    let id = entry_id(&state, &req.path);
    auth.require(&id, Action::Read)?;
    let diff = state.wiki.entries.history_diff(&id, &req.commit).await?;
    Ok(Json(json!({ "ok": true, "diff": diff })))
}
