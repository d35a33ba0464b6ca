use askama::Template;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::auth::AuthAreaView;
use crate::db::models::ContentKind;
use crate::error::AppResult;
use crate::routes::chrome;
use crate::routes::content::heading;
use crate::state::AppState;

pub struct SectionCard {
    pub path: &'static str,
    pub label: &'static str,
    pub count: usize,
}

#[derive(Template)]
#[template(path = "pages/home.html")]
pub struct HomeTemplate {
    pub area: AuthAreaView,
    pub status: String,
    pub sections: Vec<SectionCard>,
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

pub async fn index(State(state): State<AppState>) -> AppResult<Response> {
    let (area, status) = chrome(&state).await;

    let mut sections = Vec::with_capacity(ContentKind::ALL.len());
    for kind in ContentKind::ALL {
        let count = match state.auth.list_content(kind).await {
            Ok(items) => items.len(),
            Err(e) => {
                tracing::debug!("Could not count {}: {}", kind.table(), e);
                0
            }
        };
        sections.push(SectionCard {
            path: kind.table(),
            label: heading(kind),
            count,
        });
    }

    Ok(Html(HomeTemplate {
        area,
        status,
        sections,
    })
    .into_response())
}
