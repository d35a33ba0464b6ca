use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use tempfile::TempDir;
use tower::ServiceExt;

use khyati::auth::Auth;
use khyati::config::{AuthConfig, Config, RemoteConfig};
use khyati::db::{self, KvStore};
use khyati::routes;
use khyati::state::AppState;

struct Site {
    app: Router,
    state: AppState,
    _dir: TempDir,
}

async fn demo_state(dir: &TempDir) -> AppState {
    let db_path = dir.path().join("khyati.db");
    let pool = db::create_pool(&db_path).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let mut config = Config::default();
    config.site.admin_email = Some("admin@x.com".into());
    config.site.content_dir = Some(dir.path().join("content"));
    config.auth = AuthConfig { bcrypt_cost: 4 };

    let auth = Auth::from_config(
        &RemoteConfig::default(),
        &config.auth,
        KvStore::new(pool),
        config.site.content_dir.as_deref(),
    )
    .await;
    AppState::new(config, Arc::new(auth))
}

async fn site() -> Site {
    let dir = TempDir::new().unwrap();
    let state = demo_state(&dir).await;
    state.start().await.unwrap();
    Site {
        app: routes::app(state.clone()),
        state,
        _dir: dir,
    }
}

impl Site {
    async fn get(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// POST a form; returns status, Location header and body.
    async fn post(&self, uri: &str, form: &str) -> (StatusCode, Option<String>, String) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, location, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn sign_up(&self, email: &str, first_name: &str) {
        let form = format!(
            "first_name={}&email={}&password=pw1",
            first_name,
            email.replace('@', "%40")
        );
        let (status, location, _) = self.post("/signup", &form).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location.as_deref(), Some("/"));
    }
}

// --- Header ---

#[tokio::test]
async fn signed_out_header_offers_links() {
    let site = site().await;
    let (status, body) = site.get("/").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#"id="auth-area""#));
    assert!(body.contains(r#"href="/login""#));
    assert!(body.contains(r#"href="/signup""#));
    assert!(!body.contains("header-greeting"));
    assert!(body.contains("<h1>Khyati</h1>"));
    assert!(body.contains(r#"id="auth-debug-banner""#));
    assert!(body.contains("Auth: Demo (missing remote url or anon key)"));
}

#[tokio::test]
async fn hidden_links_leave_area_empty() {
    let dir = TempDir::new().unwrap();
    let mut state = demo_state(&dir).await;
    state.config.site.show_auth_links = false;
    let state = AppState::new(state.config.clone(), state.auth.clone());
    state.start().await.unwrap();
    let app = routes::app(state);

    let request = Request::get("/auth/area").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains(r#"id="auth-area""#));
    assert!(!body.contains("/login"));
}

#[tokio::test]
async fn sign_up_greets_by_first_name() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;

    let (_, body) = site.get("/").await;
    assert!(body.contains(r#"<span id="header-greeting">Welcome Asha</span>"#));
    assert!(body.contains(r#"id="logout-btn""#));
    assert!(body.contains("<h1>Asha</h1>"));
    assert!(!body.contains(r#"href="/signup""#));
}

#[tokio::test]
async fn duplicate_sign_up_shows_error() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;
    site.post("/logout", "").await;

    let (status, _, body) = site
        .post("/signup", "email=asha%40x.com&password=other")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("User already exists"));
}

#[tokio::test]
async fn wrong_password_stays_on_login() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;
    site.post("/logout", "").await;

    let (status, location, body) = site
        .post("/login", "email=asha%40x.com&password=wrong")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(location.is_none());
    assert!(body.contains("Invalid credentials"));
    assert!(body.contains(r#"value="asha@x.com""#));

    let (status, location, _) = site
        .post("/login", "email=asha%40x.com&password=pw1")
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/"));
}

#[tokio::test]
async fn missing_credentials_are_reported() {
    let site = site().await;
    let (_, _, body) = site.post("/login", "email=&password=").await;
    assert!(body.contains("Email and password required"));
}

#[tokio::test]
async fn logout_rerenders_signed_out() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;
    let mut published = site.state.auth_area.subscribe();
    published.borrow_and_update();

    let (status, location, _) = site.post("/logout", "").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/"));

    assert!(published.has_changed().unwrap());
    assert!(published.borrow_and_update().signed_in.is_none());

    let (_, body) = site.get("/auth/area").await;
    assert!(!body.contains("header-greeting"));
    assert!(body.contains(r#"href="/login""#));
}

#[tokio::test]
async fn status_endpoint_reports_backend() {
    let site = site().await;
    let (status, body) = site.get("/auth/status").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["backend"], "Demo");
    assert_eq!(json["init_error"], "missing remote url or anon key");
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn events_stream_starts_with_current_view() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;

    let request = Request::get("/auth/events").body(Body::empty()).unwrap();
    let response = site.app.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let mut stream = response.into_body().into_data_stream();
    let first = stream.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: auth-area"));
    assert!(text.contains("Welcome Asha"));
}

#[tokio::test]
async fn callback_needs_remote_backend() {
    let site = site().await;
    let (status, body) = site
        .get("/auth/callback?access_token=a&refresh_token=b")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Session links need the remote backend"));

    let (_, body) = site
        .get("/auth/callback?error_description=Link%20expired")
        .await;
    assert!(body.contains("Link expired"));
}

// --- Profile ---

#[tokio::test]
async fn profile_requires_sign_in() {
    let site = site().await;
    let request = Request::get("/profile").body(Body::empty()).unwrap();
    let response = site.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/login");
}

#[tokio::test]
async fn profile_shows_sign_up_fields() {
    let site = site().await;
    site.post(
        "/signup",
        "first_name=Meera&last_name=Rao&username=meera&email=meera%40x.com&password=pw1",
    )
    .await;

    let (status, body) = site.get("/profile").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<dd>Meera</dd>"));
    assert!(body.contains("<dd>Rao</dd>"));
    assert!(body.contains("<dd>meera</dd>"));
    assert!(body.contains("<dd>meera@x.com</dd>"));
    assert!(!body.contains("No profile saved yet"));
}

// --- Comments ---

#[tokio::test]
async fn comment_form_only_when_signed_in() {
    let site = site().await;
    let (status, body) = site.get("/comments/game/g1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("to comment."));
    assert!(!body.contains("comment-form"));

    let (status, _, _) = site.post("/comments/game/g1", "body=hello").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    site.sign_up("asha@x.com", "Asha").await;
    let (_, body) = site.get("/comments/game/g1").await;
    assert!(body.contains("comment-form"));
}

#[tokio::test]
async fn posted_comments_list_newest_first() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;

    for text in ["older", "newer"] {
        let (status, location, _) = site
            .post("/comments/video/v1", &format!("body={}", text))
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location.as_deref(), Some("/comments/video/v1"));
    }

    let (_, body) = site.get("/comments/video/v1").await;
    let newer = body.find("newer").unwrap();
    let older = body.find("older").unwrap();
    assert!(newer < older);
    assert!(body.contains("<strong>Asha</strong>"));
    assert!(body.contains("Edit"));
}

#[tokio::test]
async fn empty_comment_is_rejected_inline() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;

    let (status, _, body) = site.post("/comments/story/s1", "body=+++").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Comment cannot be empty"));
}

#[tokio::test]
async fn only_the_author_edits() {
    let site = site().await;
    site.sign_up("asha@x.com", "Asha").await;
    site.post("/comments/video/v1", "body=mine").await;
    let comment_id = site
        .state
        .auth
        .list_comments(khyati::db::models::ContentKind::Video, "v1")
        .await
        .unwrap()[0]
        .id
        .clone()
        .unwrap();
    let edit_url = format!("/comments/video/v1/{}", comment_id);

    let (status, _, _) = site.post(&edit_url, "body=mine%2C+edited").await;
    assert_eq!(status, StatusCode::SEE_OTHER);

    // The same comment id under another thread is not found.
    let elsewhere = format!("/comments/game/v1/{}", comment_id);
    let (status, _, _) = site.post(&elsewhere, "body=moved").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    site.post("/logout", "").await;
    site.sign_up("ravi@x.com", "Ravi").await;
    let (status, _, _) = site.post(&edit_url, "body=hijack").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = site.get("/comments/video/v1").await;
    assert!(body.contains("mine, edited"));
    assert!(!body.contains("hijack"));
    // Ravi is not the author, so no edit control.
    assert!(!body.contains("<summary>Edit</summary>"));

    let (status, _, _) = site.post("/comments/video/v1/nope", "body=x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_kind_is_not_found() {
    let site = site().await;
    let (status, _) = site.get("/comments/podcast/p1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn comment_page_waits_for_first_render() {
    let dir = TempDir::new().unwrap();
    let state = demo_state(&dir).await;
    let app = routes::app(state.clone());

    let pending = tokio::spawn(async move {
        let request = Request::get("/comments/game/g1").body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap().status()
    });
    tokio::task::yield_now().await;
    assert!(!pending.is_finished());

    state.auth_area.render().await;
    assert_eq!(pending.await.unwrap(), StatusCode::OK);
}

// --- Content and admin ---

#[tokio::test]
async fn fixtures_are_listed() {
    let dir = TempDir::new().unwrap();
    let content = dir.path().join("content");
    std::fs::create_dir_all(&content).unwrap();
    std::fs::write(
        content.join("stories.json"),
        r#"[{"title":"The Moon Cat","slug":"moon-cat","excerpt":"A cat on the moon"}]"#,
    )
    .unwrap();

    let state = demo_state(&dir).await;
    state.start().await.unwrap();
    let app = routes::app(state);

    let request = Request::get("/stories").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("The Moon Cat"));
    assert!(body.contains("comments-link"));
    assert!(body.contains("moon-cat"));
}

#[tokio::test]
async fn admin_panel_only_for_admin() {
    let site = site().await;
    let (_, body) = site.get("/games").await;
    assert!(!body.contains("admin-area"));

    site.sign_up("kid@x.com", "Kid").await;
    let (_, body) = site.get("/games").await;
    assert!(!body.contains("admin-area"));
    let (status, _, _) = site
        .post("/admin/game", "title=Maze&embed=https%3A%2F%2Fgames.example%2Fmaze")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    site.post("/logout", "").await;
    site.sign_up("admin@x.com", "Admin").await;
    let (_, body) = site.get("/games").await;
    assert!(body.contains(r#"id="admin-area""#));

    let (status, location, _) = site
        .post("/admin/game", "title=Maze&embed=https%3A%2F%2Fgames.example%2Fmaze")
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/games"));

    let (_, body) = site.get("/games").await;
    assert!(body.contains("Maze"));
    assert!(body.contains("games.example"));
}

#[tokio::test]
async fn embedded_games_keep_separate_threads() {
    let site = site().await;
    site.sign_up("admin@x.com", "Admin").await;
    for (title, n) in [("Maze", 111), ("Pong", 222)] {
        let form = format!(
            "title={}&embed=https%3A%2F%2Fscratch.mit.edu%2Fprojects%2F{}%2Fembed",
            title, n
        );
        site.post("/admin/game", &form).await;
    }

    let ids: Vec<String> = site
        .state
        .auth
        .list_content(khyati::db::models::ContentKind::Game)
        .await
        .unwrap()
        .iter()
        .filter_map(|g| g.content_id())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    site.post(&format!("/comments/game/{}", ids[0]), "body=on+maze").await;
    let (_, body) = site.get(&format!("/comments/game/{}", ids[1])).await;
    assert!(!body.contains("on maze"));
    let (_, body) = site.get(&format!("/comments/game/{}", ids[0])).await;
    assert!(body.contains("on maze"));
}

#[tokio::test]
async fn story_slug_must_be_url_safe() {
    let site = site().await;
    site.sign_up("admin@x.com", "Admin").await;

    let (status, _, body) = site
        .post("/admin/story", "title=Moon&slug=moon%2Fcat+tale")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Slug may use only lowercase letters, digits and hyphens"));

    let (status, _, _) = site.post("/admin/story", "title=Moon&slug=moon-cat-2").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn story_without_slug_is_rejected() {
    let site = site().await;
    site.sign_up("admin@x.com", "Admin").await;

    let (status, _, body) = site.post("/admin/story", "title=Moon").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Slug required"));
}

#[tokio::test]
async fn home_counts_sections() {
    let site = site().await;
    site.sign_up("admin@x.com", "Admin").await;
    site.post("/admin/video", "title=Clip&embed=dQw4w9WgXcQ").await;

    let (_, body) = site.get("/").await;
    assert!(body.contains(r#"href="/videos""#));
    assert!(body.contains("1 available"));
}

// --- Assets ---

#[tokio::test]
async fn stylesheet_is_served() {
    let site = site().await;
    let request = Request::get("/assets/css/site.css")
        .body(Body::empty())
        .unwrap();
    let response = site.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/css");

    let (status, _) = site.get("/assets/missing.css").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
