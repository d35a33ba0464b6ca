use std::convert::Infallible;

use askama::Template;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::auth::AuthAreaView;
use crate::db::models::ProfileDraft;
use crate::error::AppResult;
use crate::extractors::MaybeUser;
use crate::routes::chrome;
use crate::routes::home::Html;
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub area: AuthAreaView,
    pub status: String,
    pub email: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "pages/signup.html")]
pub struct SignupTemplate {
    pub area: AuthAreaView,
    pub status: String,
    pub form: SignupForm,
    pub error: Option<String>,
    pub notice: Option<String>,
}

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub area: AuthAreaView,
    pub status: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub has_profile: bool,
}

#[derive(Template)]
#[template(path = "components/auth_area.html")]
pub struct AuthAreaTemplate {
    pub area: AuthAreaView,
}

// -- Request types --

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct SignupForm {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

impl SignupForm {
    fn draft(&self) -> ProfileDraft {
        ProfileDraft {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
        }
    }
}

/// Tokens appended by the identity service to the confirmation link.
#[derive(Deserialize)]
pub struct CallbackQuery {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub error_description: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login_submit))
        .route("/signup", get(signup_page).post(signup_submit))
        .route("/logout", post(logout))
        .route("/profile", get(profile))
        .route("/auth/area", get(auth_area))
        .route("/auth/status", get(auth_status))
        .route("/auth/events", get(auth_events))
        .route("/auth/callback", get(callback))
}

async fn login_with_error(state: &AppState, email: String, error: Option<String>) -> Response {
    let (area, status) = chrome(state).await;
    Html(LoginTemplate {
        area,
        status,
        email,
        error,
    })
    .into_response()
}

async fn flush_pending_profile(state: &AppState) {
    if let Err(e) = state.auth.flush_pending_profile().await {
        tracing::warn!("Pending profile not created: {}", e);
    }
}

// -- Sign in / sign up --

/// GET /login
async fn login_page(State(state): State<AppState>) -> Response {
    login_with_error(&state, String::new(), None).await
}

/// POST /login
async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let result = state.auth.sign_in(form.email.trim(), &form.password).await;
    match result {
        Ok(user) => {
            tracing::info!("{} signed in", user.email);
            flush_pending_profile(&state).await;
            state.auth_area.render().await;
            Ok(Redirect::to("/").into_response())
        }
        Err(e) if e.is_user_facing() => {
            Ok(login_with_error(&state, form.email, Some(e.to_string())).await)
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /signup
async fn signup_page(State(state): State<AppState>) -> Response {
    let (area, status) = chrome(&state).await;
    Html(SignupTemplate {
        area,
        status,
        form: SignupForm::default(),
        error: None,
        notice: None,
    })
    .into_response()
}

/// POST /signup: create the account and its profile. When the backend wants
/// the address confirmed first, the profile waits in the stash.
async fn signup_submit(
    State(state): State<AppState>,
    Form(form): Form<SignupForm>,
) -> AppResult<Response> {
    let result = state
        .auth
        .register(form.email.trim(), &form.password, form.draft())
        .await;

    let (error, notice) = match result {
        Ok(outcome) if outcome.confirmed => {
            tracing::info!("New account {}", form.email.trim());
            state.auth_area.render().await;
            return Ok(Redirect::to("/").into_response());
        }
        Ok(_) => (
            None,
            Some("Check your email to confirm your account, then sign in.".to_string()),
        ),
        Err(e) if e.is_user_facing() => (Some(e.to_string()), None),
        Err(e) => return Err(e.into()),
    };

    let (area, status) = chrome(&state).await;
    Ok(Html(SignupTemplate {
        area,
        status,
        form,
        error,
        notice,
    })
    .into_response())
}

/// POST /logout
async fn logout(State(state): State<AppState>) -> Response {
    if let Err(e) = state.auth_area.logout().await {
        // Backends drop the local session even when the remote call fails.
        tracing::warn!("Sign-out reported an error: {}", e);
        state.auth_area.render().await;
    }
    Redirect::to("/").into_response()
}

/// GET /auth/callback: landing page of the email confirmation link.
async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(err) = query.error_description {
        return login_with_error(&state, String::new(), Some(err)).await;
    }

    let (Some(access), Some(refresh)) = (query.access_token, query.refresh_token) else {
        return login_with_error(
            &state,
            String::new(),
            Some("Confirmation link is missing its session".to_string()),
        )
        .await;
    };

    match state.auth.adopt_session(&access, &refresh).await {
        Ok(user) => {
            tracing::info!("{} confirmed their address", user.email);
            flush_pending_profile(&state).await;
            state.auth_area.render().await;
            Redirect::to("/").into_response()
        }
        Err(e) => {
            tracing::warn!("Confirmation link rejected: {}", e);
            login_with_error(&state, String::new(), Some(e.to_string())).await
        }
    }
}

// -- Profile --

/// GET /profile
async fn profile(State(state): State<AppState>, maybe_user: MaybeUser) -> Response {
    let Some(user) = maybe_user.0 else {
        return Redirect::to("/login").into_response();
    };

    let stored = match state.auth.get_profile(&user.id).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!("Profile lookup for {} failed: {}", user.email, e);
            None
        }
    };

    let from_metadata = |key: &str| user.metadata.get(key).cloned().unwrap_or_default();
    let (first_name, last_name, username) = match &stored {
        Some(p) => (
            p.first_name.clone().unwrap_or_default(),
            p.last_name.clone().unwrap_or_default(),
            p.username.clone().unwrap_or_default(),
        ),
        None => (
            from_metadata("first_name"),
            from_metadata("last_name"),
            from_metadata("username"),
        ),
    };
    let email = stored
        .as_ref()
        .and_then(|p| p.email.clone())
        .unwrap_or_else(|| user.email.clone());

    let (area, status) = chrome(&state).await;
    Html(ProfileTemplate {
        area,
        status,
        email,
        first_name,
        last_name,
        username,
        has_profile: stored.is_some(),
    })
    .into_response()
}

// -- Auth area --

/// GET /auth/area: the header fragment as last published.
async fn auth_area(State(state): State<AppState>) -> Response {
    state.auth_area.ready().wait().await;
    Html(AuthAreaTemplate {
        area: state.auth_area.current(),
    })
    .into_response()
}

/// GET /auth/status
async fn auth_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.auth.status();
    Json(serde_json::json!({
        "backend": status.backend.to_string(),
        "init_error": status.init_error,
        "summary": status.summary(),
        "ready": state.auth_area.ready().is_ready(),
    }))
}

fn area_event(view: AuthAreaView) -> Event {
    let greeting = view.greeting();
    let signed_in = view.signed_in.is_some();
    let brand_title = view.brand_title.clone();
    let html = match (AuthAreaTemplate { area: view }).render() {
        Ok(html) => html,
        Err(e) => {
            tracing::error!("Auth area render error: {}", e);
            String::new()
        }
    };
    let payload = serde_json::json!({
        "signed_in": signed_in,
        "greeting": greeting,
        "brand_title": brand_title,
        "html": html,
    });
    Event::default().event("auth-area").data(payload.to_string())
}

/// GET /auth/events: the published auth area as server-sent events. The
/// current view is sent first, then every change.
async fn auth_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.auth_area.subscribe())
        .map(|view| Ok::<_, Infallible>(area_event(view)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
