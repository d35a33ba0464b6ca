use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::db::models::User;
use crate::error::AppError;
use crate::state::AppState;

/// The signed-in user. Rejects with 401 when nobody is signed in.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, state).await?.0 {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(crate::auth::AuthError::NotAuthenticated.into()),
        }
    }
}

/// Optional user. Waits for the first auth-area render so a request that
/// races startup never sees a false "signed out".
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state.auth_area.ready().wait().await;
        match state.auth.current_user().await {
            Ok(user) => Ok(MaybeUser(user)),
            Err(e) => {
                tracing::warn!("Treating request as signed out: {}", e);
                Ok(MaybeUser(None))
            }
        }
    }
}
