use askama::Template;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::auth::AuthAreaView;
use crate::comments::can_edit;
use crate::db::models::{Comment, ContentKind, User};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::routes::chrome;
use crate::routes::home::Html;
use crate::state::AppState;

// --- View structs ---

pub struct CommentView {
    pub id: String,
    pub who: String,
    pub when: String,
    pub body: String,
    pub editable: bool,
}

impl CommentView {
    fn new(comment: Comment, viewer: Option<&User>) -> Self {
        let editable = can_edit(&comment, viewer);
        let who = comment
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                comment
                    .user_email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Someone".to_string());
        Self {
            id: comment.id.unwrap_or_default(),
            who,
            when: comment.created_at.format("%b %-d, %Y %H:%M").to_string(),
            body: comment.body,
            editable,
        }
    }
}

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/comments.html")]
pub struct CommentsTemplate {
    pub area: AuthAreaView,
    pub status: String,
    pub kind: ContentKind,
    pub content_id: String,
    pub comments_url: String,
    pub comments: Vec<CommentView>,
    pub signed_in: bool,
    pub error: Option<String>,
}

// --- Forms ---

#[derive(Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub body: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/comments/{kind}/{content_id}",
            get(show_comments).post(create_comment),
        )
        .route("/comments/{kind}/{content_id}/{comment_id}", post(edit_comment))
}

fn parse_kind(kind: &str) -> AppResult<ContentKind> {
    kind.parse().map_err(|_| AppError::NotFound)
}

fn comments_url(kind: ContentKind, content_id: &str) -> String {
    format!("/comments/{}/{}", kind, content_id)
}

async fn render_comments(
    state: &AppState,
    kind: ContentKind,
    content_id: String,
    viewer: Option<&User>,
    mut error: Option<String>,
) -> AppResult<Response> {
    let comments = match state.auth.list_comments(kind, &content_id).await {
        Ok(list) => list,
        Err(e) if e.is_user_facing() => {
            error.get_or_insert_with(|| e.to_string());
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let (area, status) = chrome(state).await;
    Ok(Html(CommentsTemplate {
        area,
        status,
        kind,
        comments_url: comments_url(kind, &content_id),
        content_id,
        comments: comments
            .into_iter()
            .map(|c| CommentView::new(c, viewer))
            .collect(),
        signed_in: viewer.is_some(),
        error,
    })
    .into_response())
}

/// GET /comments/{kind}/{content_id}: list plus the form when signed in.
/// `MaybeUser` holds the request until the first auth render, so the form
/// is never hidden from a signed-in user during startup.
async fn show_comments(
    State(state): State<AppState>,
    Path((kind, content_id)): Path<(String, String)>,
    maybe_user: MaybeUser,
) -> AppResult<Response> {
    let kind = parse_kind(&kind)?;
    render_comments(&state, kind, content_id, maybe_user.0.as_ref(), None).await
}

/// POST /comments/{kind}/{content_id}
async fn create_comment(
    State(state): State<AppState>,
    Path((kind, content_id)): Path<(String, String)>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let kind = parse_kind(&kind)?;
    let result = state.auth.post_comment(kind, &content_id, &form.body).await;
    match result {
        Ok(_) => Ok(Redirect::to(&comments_url(kind, &content_id)).into_response()),
        Err(e) if e.is_user_facing() => {
            let error = Some(e.to_string());
            render_comments(&state, kind, content_id, Some(&user), error).await
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /comments/{kind}/{content_id}/{comment_id}: edit by the author only.
async fn edit_comment(
    State(state): State<AppState>,
    Path((kind, content_id, comment_id)): Path<(String, String, String)>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let kind = parse_kind(&kind)?;
    let result = state
        .auth
        .edit_comment(kind, &content_id, &comment_id, &form.body)
        .await;
    match result {
        Ok(()) => Ok(Redirect::to(&comments_url(kind, &content_id)).into_response()),
        Err(e) if e.is_user_facing() => {
            let error = Some(e.to_string());
            render_comments(&state, kind, content_id, Some(&user), error).await
        }
        Err(e) => Err(e.into()),
    }
}
