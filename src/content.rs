use chrono::Utc;
use serde::Deserialize;

use crate::auth::{Auth, AuthError, AuthResult};
use crate::config::SiteConfig;
use crate::db::models::{ContentItem, ContentKind};

/// Fields of the admin content-entry form. Which ones matter depends on the
/// kind being added.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentForm {
    pub title: String,
    pub embed: String,
    pub thumbnail: String,
    pub slug: String,
    pub excerpt: String,
    pub body: String,
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// YouTube video ids are 11 characters of `[A-Za-z0-9_-]`.
fn is_youtube_id(value: &str) -> bool {
    value.len() == 11
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Slugs become a single path segment of the comments URL.
fn is_slug(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl ContentForm {
    pub fn into_item(self, kind: ContentKind) -> AuthResult<ContentItem> {
        let mut item = ContentItem {
            title: non_empty(self.title),
            thumbnail: non_empty(self.thumbnail),
            created_at: Some(Utc::now()),
            ..Default::default()
        };

        match kind {
            ContentKind::Game => {
                item.embed = non_empty(self.embed);
            }
            ContentKind::Video => {
                // The form takes either a bare video id or an embed URL.
                match non_empty(self.embed) {
                    Some(id) if is_youtube_id(&id) => {
                        item.embed = Some(format!("https://www.youtube.com/embed/{}", id));
                        item.video_id = Some(id);
                    }
                    other => item.embed = other,
                }
            }
            ContentKind::Story => {
                let slug = non_empty(self.slug)
                    .ok_or_else(|| AuthError::Validation("Slug required".into()))?;
                if !is_slug(&slug) {
                    return Err(AuthError::Validation(
                        "Slug may use only lowercase letters, digits and hyphens".into(),
                    ));
                }
                item.slug = Some(slug);
                item.excerpt = non_empty(self.excerpt);
                item.body = non_empty(self.body);
            }
        }

        Ok(item)
    }
}

impl Auth {
    pub async fn is_admin(&self, site: &SiteConfig) -> bool {
        match self.current_user().await {
            Ok(Some(user)) => site.is_admin(&user.id, &user.email),
            _ => false,
        }
    }

    /// Oldest first; items without a timestamp (fixtures) lead.
    pub async fn list_content(&self, kind: ContentKind) -> AuthResult<Vec<ContentItem>> {
        let mut items = self.backend().list_content(kind).await?;
        items.sort_by_key(|item| item.created_at);
        Ok(items)
    }

    pub async fn add_content(
        &self,
        site: &SiteConfig,
        kind: ContentKind,
        form: ContentForm,
    ) -> AuthResult<ContentItem> {
        let user = self.current_user().await?.ok_or(AuthError::NotAuthenticated)?;
        if !site.is_admin(&user.id, &user.email) {
            return Err(AuthError::Forbidden);
        }

        let item = form.into_item(kind)?;
        let stored = self.backend().insert_content(kind, item).await?;
        tracing::info!("{} added a {}", user.email, kind);
        Ok(stored)
    }
}
