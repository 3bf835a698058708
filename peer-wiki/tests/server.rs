use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use peer_wiki::api;
use peer_wiki_core::auth::handshake::signature;
use peer_wiki_core::config::PortalConfig;
use peer_wiki_core::search::SearchIndex;
use peer_wiki_core::users::Provider;
use peer_wiki_core::{Wiki, WikiConfig};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const SECRET: &str = "s3cret";

struct TestApp {
    _dir: tempfile::TempDir,
    wiki: Arc<Wiki>,
    router: Router,
    admin: String,
}

fn setup() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WikiConfig::new(dir.path().join("repo"), dir.path().join("data"));
    config.session_secret = "test-session-secret".into();
    config.admin_email = Some("admin@example.com".into());
    config.admin_password = Some("correct horse".into());
    config.portal = Some(PortalConfig {
        agent_secret: SECRET.into(),
        ..PortalConfig::default()
    });
    let wiki = Arc::new(Wiki::with_search_index(config, SearchIndex::in_memory().unwrap()).unwrap());
    let admin_user = wiki
        .users
        .find_by_email("admin@example.com", Provider::Local)
        .unwrap();
    let admin = wiki.sessions.issue(&admin_user).unwrap();
    TestApp {
        router: api::router(wiki.clone()),
        wiki,
        admin,
        _dir: dir,
    }
}

fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

fn with_peer(mut req: Request<Body>) -> Request<Body> {
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    req
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> Response {
        self.router.clone().oneshot(with_peer(req)).await.unwrap()
    }

    async fn as_admin(&self, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = request(method, uri).header(header::AUTHORIZATION, format!("Bearer {}", self.admin));
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(req).await
    }

    async fn form(&self, uri: &str, body: String) -> Response {
        self.send(
            request("POST", uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

async fn text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&text(resp).await).unwrap()
}

#[tokio::test]
async fn health_endpoint() {
    let app = setup();
    let resp = app.send(request("GET", "/health").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(text(resp).await, "OK");
}

#[tokio::test]
async fn guest_cannot_read_private_wiki() {
    let app = setup();
    let resp = app.send(request("GET", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn create_view_and_duplicate() {
    let app = setup();
    let resp = app
        .as_admin("PUT", "/create/Notes", Some(json!({ "markdown": "<!-- TITLE: My Notes -->\n# Notes" })))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["redirect"], "/notes");

    let resp = app
        .as_admin("PUT", "/create/notes", Some(json!({ "markdown": "again" })))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = app.as_admin("GET", "/createcheck/notes", None).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = app.as_admin("GET", "/notes", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view = body_json(resp).await;
    assert_eq!(view["page"]["meta"]["title"], "My Notes");

    let resp = app.as_admin("GET", "/source/notes", None).await;
    assert!(body_json(resp).await["markdown"].as_str().unwrap().contains("# Notes"));

    let resp = app
        .as_admin("PUT", "/create/edit", Some(json!({ "markdown": "x" })))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_query_errors() {
    let app = setup();
    app.as_admin("PUT", "/create/rust", Some(json!({ "markdown": "ownership rules" })))
        .await;
    app.wiki.search.flush().await;

    let resp = app.as_admin("GET", "/search?q=ownership", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await[0]["id"], "rust");

    let resp = app.as_admin("GET", "/search?q=nosuchfield%3Afoo", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_form_offers_starter() {
    let app = setup();
    let resp = app.as_admin("GET", "/create/my-new-page", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body["starter"].as_str().unwrap().contains("My New Page"));
}

#[tokio::test]
async fn delete_with_children_rejected() {
    let app = setup();
    for path in ["/create/docs", "/create/docs/intro"] {
        let resp = app.as_admin("PUT", path, Some(json!({ "markdown": "# page" }))).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app.as_admin("DELETE", "/docs", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(app.wiki.entries.exists("docs").await);

    let resp = app.as_admin("DELETE", "/docs/intro", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = app.as_admin("DELETE", "/docs", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!app.wiki.entries.exists("docs").await);
}

#[tokio::test]
async fn move_page() {
    let app = setup();
    app.as_admin("PUT", "/create/old-name", Some(json!({ "markdown": "body" })))
        .await;
    let resp = app
        .as_admin("PUT", "/old-name", Some(json!({ "move": "/New Name" })))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["redirect"], "/newname");

    assert_eq!(app.as_admin("GET", "/old-name", None).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.as_admin("GET", "/newname", None).await.status(), StatusCode::OK);

    let resp = app.as_admin("PUT", "/home", Some(json!({ "move": "x" }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_and_diff() {
    let app = setup();
    app.as_admin("PUT", "/create/page", Some(json!({ "markdown": "one\n" })))
        .await;
    app.as_admin("PUT", "/edit/page", Some(json!({ "markdown": "two\n" })))
        .await;

    let resp = app.as_admin("GET", "/hist/page", None).await;
    let body = body_json(resp).await;
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    let sha = history[0]["commit"].as_str().unwrap().to_string();

    let resp = app
        .as_admin("POST", "/hist", Some(json!({ "path": "page", "commit": sha })))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_json(resp).await["diff"].as_str().unwrap().contains("+two"));

    let resp = app
        .as_admin("POST", "/hist", Some(json!({ "path": "page", "commit": "HEAD" })))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn portal_login_round_trip() {
    let app = setup();
    let resp = app.send(request("GET", "/login/portal").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "https://i.cs.hku.hk/~plearn/");

    let s = signature("u1", SECRET);
    let resp = app
        .form("/portal-login/get-login-token", format!("uid=u1&s={s}"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = text(resp).await;
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

    let resp = app
        .send(request("GET", &format!("/portal-login/{token}")).body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "/");
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("wiki_session="));

    let user = app
        .wiki
        .users
        .find_by_email("u1@hku.hk", Provider::Hku)
        .unwrap();
    assert_eq!(user.name, "Peer Learner");

    // the session cookie authenticates later requests
    let session = cookie.split(';').next().unwrap().to_string();
    let resp = app
        .send(
            request("GET", "/createcheck/fresh-page")
                .header(header::COOKIE, session)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // tokens are single-use
    let resp = app
        .send(request("GET", &format!("/portal-login/{token}")).body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_signature_is_rejected() {
    let app = setup();
    let users_before = app.wiki.users.len();
    let resp = app
        .form(
            "/portal-login/get-login-token",
            format!("uid=u1&s={}", signature("u1", "wrong")),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["msg"], "unauthorized");
    assert_eq!(app.wiki.users.len(), users_before);
}

#[tokio::test]
async fn local_login_and_lockout() {
    let app = setup();
    let resp = app
        .form("/login", "email=admin%40example.com&password=correct+horse".into())
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert!(resp.headers().contains_key(header::SET_COOKIE));

    for _ in 0..6 {
        let resp = app
            .form("/login", "email=admin%40example.com&password=nope".into())
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
    let resp = app
        .form("/login", "email=admin%40example.com&password=correct+horse".into())
        .await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
}
