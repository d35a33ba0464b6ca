use askama::Template;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};

use crate::auth::AuthAreaView;
use crate::content::ContentForm;
use crate::db::models::{ContentItem, ContentKind};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::routes::chrome;
use crate::routes::home::Html;
use crate::state::AppState;

pub struct ListingItem {
    pub title: String,
    pub thumbnail: Option<String>,
    pub source: Option<String>,
    pub excerpt: Option<String>,
    pub body: Option<String>,
    pub comments_url: Option<String>,
}

impl ListingItem {
    fn new(kind: ContentKind, item: ContentItem) -> Self {
        let comments_url = item
            .content_id()
            .map(|id| format!("/comments/{}/{}", kind, id));
        Self {
            title: item.title.clone().unwrap_or_else(|| "Untitled".to_string()),
            source: item.source().map(str::to_string),
            thumbnail: item.thumbnail,
            excerpt: item.excerpt,
            body: item.body,
            comments_url,
        }
    }
}

#[derive(Template)]
#[template(path = "pages/listing.html")]
pub struct ListingTemplate {
    pub area: AuthAreaView,
    pub status: String,
    pub heading: &'static str,
    pub kind: &'static str,
    pub items: Vec<ListingItem>,
    pub is_admin: bool,
    pub error: Option<String>,
}

pub fn heading(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Game => "Games",
        ContentKind::Video => "Videos",
        ContentKind::Story => "Stories",
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/games", get(games))
        .route("/videos", get(videos))
        .route("/stories", get(stories))
        .route("/admin/{kind}", post(add_content))
}

async fn render_listing(
    state: &AppState,
    kind: ContentKind,
    mut error: Option<String>,
) -> AppResult<Response> {
    let items = match state.auth.list_content(kind).await {
        Ok(items) => items,
        Err(e) if e.is_user_facing() => {
            error.get_or_insert_with(|| e.to_string());
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let (area, status) = chrome(state).await;
    let is_admin = state.auth.is_admin(&state.config.site).await;
    Ok(Html(ListingTemplate {
        area,
        status,
        heading: heading(kind),
        kind: kind.as_str(),
        items: items
            .into_iter()
            .map(|item| ListingItem::new(kind, item))
            .collect(),
        is_admin,
        error,
    })
    .into_response())
}

async fn games(State(state): State<AppState>, _user: MaybeUser) -> AppResult<Response> {
    render_listing(&state, ContentKind::Game, None).await
}

async fn videos(State(state): State<AppState>, _user: MaybeUser) -> AppResult<Response> {
    render_listing(&state, ContentKind::Video, None).await
}

async fn stories(State(state): State<AppState>, _user: MaybeUser) -> AppResult<Response> {
    render_listing(&state, ContentKind::Story, None).await
}

/// POST /admin/{kind}
async fn add_content(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    _user: CurrentUser,
    Form(form): Form<ContentForm>,
) -> AppResult<Response> {
    let kind: ContentKind = kind.parse().map_err(|_| AppError::NotFound)?;
    match state.auth.add_content(&state.config.site, kind, form).await {
        Ok(_) => Ok(Redirect::to(&format!("/{}", kind.table())).into_response()),
        Err(e) if e.is_user_facing() => render_listing(&state, kind, Some(e.to_string())).await,
        Err(e) => Err(e.into()),
    }
}
