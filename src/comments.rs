use chrono::Utc;

use crate::auth::render::display_name;
use crate::auth::{Auth, AuthError, AuthResult};
use crate::db::models::{Comment, ContentKind, User};

pub const MAX_COMMENT_LEN: usize = 2000;

/// Only the author may edit. Authorship is the canonical user id.
pub fn can_edit(comment: &Comment, viewer: Option<&User>) -> bool {
    match viewer {
        Some(user) => !user.id.is_empty() && comment.user_id == user.id,
        None => false,
    }
}

fn clean_body(body: &str) -> AuthResult<String> {
    let body = body.trim();
    if body.is_empty() {
        return Err(AuthError::Validation("Comment cannot be empty".into()));
    }
    if body.chars().count() > MAX_COMMENT_LEN {
        return Err(AuthError::Validation(format!(
            "Comment must be {} characters or less",
            MAX_COMMENT_LEN
        )));
    }
    Ok(body.to_string())
}

impl Auth {
    /// Newest first.
    pub async fn list_comments(&self, kind: ContentKind, content_id: &str) -> AuthResult<Vec<Comment>> {
        self.backend().list_comments(kind, content_id).await
    }

    pub async fn post_comment(
        &self,
        kind: ContentKind,
        content_id: &str,
        body: &str,
    ) -> AuthResult<Comment> {
        let user = self.current_user().await?.ok_or(AuthError::NotAuthenticated)?;
        let body = clean_body(body)?;

        let profile = self.get_profile(&user.id).await.unwrap_or_default();
        let comment = Comment {
            id: Some(uuid::Uuid::now_v7().to_string()),
            display_name: Some(display_name(profile.as_ref(), &user)),
            user_email: Some(user.email),
            user_id: user.id,
            content_type: kind,
            content_id: content_id.to_string(),
            body,
            created_at: Utc::now(),
        };
        let stored = self.backend().insert_comment(comment).await?;
        tracing::debug!("Comment posted on {} {}", kind, content_id);
        Ok(stored)
    }

    /// Edits a comment of the given thread. A comment that exists but belongs
    /// to another thread is reported as not found.
    pub async fn edit_comment(
        &self,
        kind: ContentKind,
        content_id: &str,
        comment_id: &str,
        body: &str,
    ) -> AuthResult<()> {
        let user = self.current_user().await?.ok_or(AuthError::NotAuthenticated)?;
        let body = clean_body(body)?;

        let comment = self
            .backend()
            .get_comment(comment_id)
            .await?
            .filter(|c| c.content_type == kind && c.content_id == content_id)
            .ok_or(AuthError::NotFound)?;
        if !can_edit(&comment, Some(&user)) {
            tracing::warn!("{} tried to edit comment {} they did not write", user.email, comment_id);
            return Err(AuthError::Forbidden);
        }

        self.backend().update_comment_body(comment_id, &body).await
    }
}
