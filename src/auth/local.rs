// Demo backend: accounts, session marker, profiles, comments and staged
// content all live in the profile's key/value store.
use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::auth::session::LocalSession;
use crate::auth::{AuthBackend, AuthError, AuthEvent, AuthResult, RecordStore, SignUpOutcome};
use crate::db::kv::{COMMENTS_KEY, PROFILES_KEY, SESSION_KEY, USERS_KEY};
use crate::db::models::{Comment, ContentItem, ContentKind, LocalUser, Metadata, Profile, User};
use crate::db::KvStore;

type Users = BTreeMap<String, LocalUser>;
type Profiles = BTreeMap<String, Profile>;

#[derive(Clone)]
pub struct LocalAdapter {
    kv: KvStore,
    bcrypt_cost: u32,
    fixtures_dir: Option<PathBuf>,
}

impl LocalAdapter {
    pub fn new(kv: KvStore) -> Self {
        Self {
            kv,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            fixtures_dir: None,
        }
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Directory holding `games.json`, `videos.json` and `stories.json`,
    /// listed ahead of anything staged through the admin panel.
    pub fn with_fixtures_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures_dir = Some(dir.into());
        self
    }

    fn users(&self) -> AuthResult<Users> {
        Ok(self.kv.get_json(USERS_KEY)?.unwrap_or_default())
    }

    fn start_session(&self, email: &str) -> AuthResult<()> {
        self.kv.set_json(SESSION_KEY, &LocalSession::issue(email))?;
        Ok(())
    }

    fn fixtures(&self, kind: ContentKind) -> Vec<ContentItem> {
        let Some(dir) = &self.fixtures_dir else {
            return Vec::new();
        };
        let path = dir.join(format!("{}.json", kind.table()));
        if !path.exists() {
            return Vec::new();
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(serde_json::from_str::<Vec<ContentItem>>(&raw)?));
        match parsed {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Ignoring unreadable fixture {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl AuthBackend for LocalAdapter {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Metadata,
    ) -> AuthResult<SignUpOutcome> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let mut users = self.users()?;
        if users.contains_key(email) {
            return Err(AuthError::DuplicateUser);
        }

        let record = LocalUser {
            id: uuid::Uuid::now_v7().to_string(),
            email: email.to_string(),
            password_hash: bcrypt::hash(password, self.bcrypt_cost)?,
            metadata,
            created_at: Utc::now(),
        };
        let user = record.to_user();
        users.insert(email.to_string(), record);
        self.kv.set_json(USERS_KEY, &users)?;
        self.start_session(email)?;

        tracing::info!("Demo account created for {}", email);
        Ok(SignUpOutcome {
            user: Some(user),
            confirmed: true,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = email.trim();
        let users = self.users()?;
        let record = users.get(email).ok_or(AuthError::InvalidCredentials)?;

        if !bcrypt::verify(password, &record.password_hash).unwrap_or(false) {
            return Err(AuthError::InvalidCredentials);
        }

        self.start_session(email)?;
        Ok(record.to_user())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.kv.remove(SESSION_KEY)?;
        Ok(())
    }

    async fn current_user(&self) -> AuthResult<Option<User>> {
        let Some(session) = self.kv.get_json::<LocalSession>(SESSION_KEY)? else {
            return Ok(None);
        };
        let users = self.users()?;
        match users.get(&session.email) {
            Some(record) => Ok(Some(record.to_user())),
            None => {
                tracing::warn!("Session marker points at unknown user {}", session.email);
                Ok(None)
            }
        }
    }

    fn on_auth_state_change(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        None
    }

    async fn upsert_profile(&self, profile: &Profile) -> AuthResult<()> {
        let key = profile
            .key()
            .ok_or_else(|| AuthError::Validation("Profile needs an id or email".into()))?
            .to_string();
        self.kv.update_json(PROFILES_KEY, |map: &mut Profiles| {
            map.insert(key, profile.clone());
        })?;
        Ok(())
    }

    async fn get_profile(&self, id_or_email: &str) -> AuthResult<Option<Profile>> {
        let map: Profiles = self.kv.get_json(PROFILES_KEY)?.unwrap_or_default();
        if let Some(profile) = map.get(id_or_email) {
            return Ok(Some(profile.clone()));
        }
        Ok(map
            .into_values()
            .find(|p| p.email.as_deref() == Some(id_or_email)))
    }
}

#[async_trait]
impl RecordStore for LocalAdapter {
    async fn insert_comment(&self, comment: Comment) -> AuthResult<Comment> {
        let stored = comment.clone();
        self.kv.update_json(COMMENTS_KEY, |list: &mut Vec<Comment>| {
            list.push(stored);
        })?;
        Ok(comment)
    }

    async fn list_comments(&self, kind: ContentKind, content_id: &str) -> AuthResult<Vec<Comment>> {
        let list: Vec<Comment> = self.kv.get_json(COMMENTS_KEY)?.unwrap_or_default();
        let mut matching: Vec<Comment> = list
            .into_iter()
            .filter(|c| c.content_type == kind && c.content_id == content_id)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn get_comment(&self, id: &str) -> AuthResult<Option<Comment>> {
        let list: Vec<Comment> = self.kv.get_json(COMMENTS_KEY)?.unwrap_or_default();
        Ok(list.into_iter().find(|c| c.id.as_deref() == Some(id)))
    }

    async fn update_comment_body(&self, id: &str, body: &str) -> AuthResult<()> {
        let found = self.kv.update_json(COMMENTS_KEY, |list: &mut Vec<Comment>| {
            match list.iter_mut().find(|c| c.id.as_deref() == Some(id)) {
                Some(comment) => {
                    comment.body = body.to_string();
                    true
                }
                None => false,
            }
        })?;
        if found {
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    async fn insert_content(&self, kind: ContentKind, mut item: ContentItem) -> AuthResult<ContentItem> {
        if item.id.is_none() {
            item.id = Some(uuid::Uuid::now_v7().to_string());
        }
        let stored = item.clone();
        self.kv
            .update_json(kind.staging_key(), |list: &mut Vec<ContentItem>| {
                list.push(stored);
            })?;
        Ok(item)
    }

    async fn list_content(&self, kind: ContentKind) -> AuthResult<Vec<ContentItem>> {
        let mut items = self.fixtures(kind);
        let staged: Vec<ContentItem> = self.kv.get_json(kind.staging_key())?.unwrap_or_default();
        items.extend(staged);
        Ok(items)
    }
}
