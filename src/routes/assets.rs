use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::Embed;

use crate::error::AppError;

/// Stylesheet and the header script, compiled into the binary.
#[derive(Embed)]
#[folder = "assets/"]
struct SiteAssets;

/// GET /assets/{*path}
pub async fn serve(Path(path): Path<String>) -> Response {
    let Some(file) = SiteAssets::get(&path) else {
        return AppError::NotFound.into_response();
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        file.data.into_owned(),
    )
        .into_response()
}
