pub mod assets;
pub mod auth;
pub mod comments;
pub mod content;
pub mod home;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthAreaView;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home::index))
        .route("/assets/{*path}", get(assets::serve))
        .merge(auth::router())
        .merge(content::router())
        .merge(comments::router())
}

pub fn app(state: AppState) -> Router {
    router().layer(TraceLayer::new_for_http()).with_state(state)
}

/// Header view and status line for a full page. Every page load re-renders
/// the auth area so the header never lags the session.
pub async fn chrome(state: &AppState) -> (AuthAreaView, String) {
    let area = state.auth_area.render().await;
    (area, state.auth.status().summary())
}
