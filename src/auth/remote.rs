// Hosted identity service adapter: GoTrue-style `/auth/v1` endpoints for
// accounts and sessions, PostgREST-style `/rest/v1` tables for rows.
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use url::Url;

use crate::auth::session::RemoteSession;
use crate::auth::{AuthBackend, AuthError, AuthEvent, AuthResult, RecordStore, SignUpOutcome};
use crate::config::RemoteConfig;
use crate::db::kv::REMOTE_SESSION_KEY;
use crate::db::models::{Comment, ContentItem, ContentKind, Metadata, NewComment, Profile, User};
use crate::db::KvStore;

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Map<String, Value>,
}

impl GoTrueUser {
    fn normalize(self) -> User {
        let metadata: Metadata = self
            .user_metadata
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Number(n) => Some((key, n.to_string())),
                Value::Bool(b) => Some((key, b.to_string())),
                _ => None,
            })
            .collect();
        User {
            id: self.id,
            email: self.email.unwrap_or_default(),
            metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoTrueSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

/// `/signup` answers with a session when the project auto-confirms and with
/// the bare user when an email confirmation is pending.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(GoTrueSession),
    User(GoTrueUser),
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

pub struct RemoteAdapter {
    client: reqwest::Client,
    base: Url,
    anon_key: String,
    kv: KvStore,
    session: Mutex<Option<RemoteSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RemoteAdapter {
    /// Build the client. Any failure here is `BackendUnavailable`; the
    /// facade answers it by falling back to the demo store.
    pub async fn connect(config: &RemoteConfig, kv: KvStore) -> AuthResult<Self> {
        let mut base = Url::parse(config.url.trim())
            .map_err(|e| AuthError::BackendUnavailable(format!("invalid remote url: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(AuthError::BackendUnavailable(format!(
                "invalid remote url: {}",
                config.url
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuthError::BackendUnavailable(format!("client init failed: {}", e)))?;

        let stored = match kv.get_json::<RemoteSession>(REMOTE_SESSION_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Discarding unreadable stored session: {}", e);
                None
            }
        };

        let (events, _) = broadcast::channel(16);
        let adapter = Self {
            client,
            base,
            anon_key: config.anon_key.trim().to_string(),
            kv,
            session: Mutex::new(stored),
            events,
        };

        if config.probe {
            adapter.probe().await?;
        }

        tracing::info!("Remote identity client created for {}", adapter.base);
        Ok(adapter)
    }

    async fn probe(&self) -> AuthResult<()> {
        let response = self
            .request(Method::GET, "auth/v1/health", None)?
            .send()
            .await
            .map_err(|e| AuthError::BackendUnavailable(format!("health check failed: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AuthError::BackendUnavailable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> AuthResult<RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|e| AuthError::RemoteOperationFailed(e.to_string()))?;
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key)))
    }

    /// Access token of the held session, or the anon key for row calls.
    async fn bearer(&self) -> String {
        match self.session.lock().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.anon_key.clone(),
        }
    }

    async fn send(request: RequestBuilder) -> AuthResult<(StatusCode, String)> {
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::RemoteOperationFailed(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::RemoteOperationFailed(e.to_string()))?;
        Ok((status, body))
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> AuthResult<T> {
        let (status, body) = Self::send(request).await?;
        if !status.is_success() {
            return Err(AuthError::RemoteOperationFailed(error_message(status, &body)));
        }
        serde_json::from_str(&body).map_err(|e| {
            AuthError::RemoteOperationFailed(format!("unexpected response from backend: {}", e))
        })
    }

    async fn send_empty(request: RequestBuilder) -> AuthResult<()> {
        let (status, body) = Self::send(request).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(AuthError::RemoteOperationFailed(error_message(status, &body)))
        }
    }

    async fn store_session(&self, session: RemoteSession) -> AuthResult<()> {
        self.kv.set_json(REMOTE_SESSION_KEY, &session)?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn clear_session(&self) -> Option<RemoteSession> {
        let previous = self.session.lock().await.take();
        if let Err(e) = self.kv.remove(REMOTE_SESSION_KEY) {
            tracing::warn!("Failed to clear stored session: {}", e);
        }
        previous
    }

    fn emit(&self, event: AuthEvent) {
        tracing::debug!("Remote auth state changed: {:?}", event);
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    async fn accept_session(&self, raw: GoTrueSession) -> AuthResult<User> {
        let expires_at = raw
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| {
                Utc::now() + Duration::seconds(raw.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS))
            });
        let user = raw.user.normalize();
        self.store_session(RemoteSession {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_at,
            user: user.clone(),
        })
        .await?;
        Ok(user)
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<()> {
        let request = self
            .request(Method::POST, "auth/v1/token", None)?
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));
        let raw: GoTrueSession = Self::send_json(request).await?;
        self.accept_session(raw).await?;
        self.emit(AuthEvent::TokenRefreshed);
        Ok(())
    }

    async fn fetch_user(&self, access_token: &str) -> AuthResult<Option<User>> {
        let request = self.request(Method::GET, "auth/v1/user", Some(access_token))?;
        let (status, body) = Self::send(request).await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthError::RemoteOperationFailed(error_message(status, &body)));
        }
        let raw: GoTrueUser = serde_json::from_str(&body).map_err(|e| {
            AuthError::RemoteOperationFailed(format!("unexpected response from backend: {}", e))
        })?;
        Ok(Some(raw.normalize()))
    }

    /// Take over a session handed back by an email-confirmation redirect.
    pub async fn adopt_session(&self, access_token: &str, refresh_token: &str) -> AuthResult<User> {
        let user = self
            .fetch_user(access_token)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        self.store_session(RemoteSession {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: Utc::now() + Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            user: user.clone(),
        })
        .await?;
        self.emit(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> AuthResult<Vec<T>> {
        let bearer = self.bearer().await;
        let request = self
            .request(Method::GET, &format!("rest/v1/{}", table), Some(&bearer))?
            .query(query);
        Self::send_json(request).await
    }

    async fn insert_returning<B: Serialize, T: DeserializeOwned>(&self, table: &str, row: &B) -> AuthResult<Option<T>> {
        let bearer = self.bearer().await;
        let request = self
            .request(Method::POST, &format!("rest/v1/{}", table), Some(&bearer))?
            .header("Prefer", "return=representation")
            .json(row);
        let mut rows: Vec<T> = Self::send_json(request).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }
}

#[async_trait]
impl AuthBackend for RemoteAdapter {
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

        let request = self
            .request(Method::POST, "auth/v1/signup", None)?
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let response: SignUpResponse = Self::send_json(request).await?;

        match response {
            SignUpResponse::Session(raw) => {
                let user = self.accept_session(raw).await?;
                self.emit(AuthEvent::SignedIn(user.clone()));
                Ok(SignUpOutcome {
                    user: Some(user),
                    confirmed: true,
                })
            }
            SignUpResponse::User(raw) => {
                // Some projects allow password sign-in before confirmation.
                match self.sign_in(email, password).await {
                    Ok(user) => Ok(SignUpOutcome {
                        user: Some(user),
                        confirmed: true,
                    }),
                    Err(e) => {
                        tracing::debug!("Sign-in right after sign-up failed: {}", e);
                        Ok(SignUpOutcome {
                            user: Some(raw.normalize()),
                            confirmed: false,
                        })
                    }
                }
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let request = self
            .request(Method::POST, "auth/v1/token", None)?
            .query(&[("grant_type", "password")])
            .json(&Credentials { email, password });
        let raw: GoTrueSession = Self::send_json(request).await?;
        let user = self.accept_session(raw).await?;
        self.emit(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let Some(previous) = self.clear_session().await else {
            return Ok(());
        };
        let request = self.request(Method::POST, "auth/v1/logout", Some(&previous.access_token))?;
        if let Err(e) = Self::send_empty(request).await {
            tracing::warn!("Remote logout failed, session dropped locally: {}", e);
        }
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_user(&self) -> AuthResult<Option<User>> {
        let Some(mut session) = self.session.lock().await.clone() else {
            return Ok(None);
        };

        if session.needs_refresh(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
            if let Err(e) = self.refresh(&session.refresh_token).await {
                tracing::warn!("Token refresh failed, signing out: {}", e);
                self.clear_session().await;
                self.emit(AuthEvent::SignedOut);
                return Ok(None);
            }
            match self.session.lock().await.clone() {
                Some(fresh) => session = fresh,
                None => return Ok(None),
            }
        }

        match self.fetch_user(&session.access_token).await? {
            Some(user) => {
                if user != session.user {
                    session.user = user.clone();
                    self.store_session(session).await?;
                }
                Ok(Some(user))
            }
            None => {
                self.clear_session().await;
                self.emit(AuthEvent::SignedOut);
                Ok(None)
            }
        }
    }

    fn on_auth_state_change(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        Some(self.events.subscribe())
    }

    async fn upsert_profile(&self, profile: &Profile) -> AuthResult<()> {
        let bearer = self.bearer().await;
        let request = self
            .request(Method::POST, "rest/v1/profiles", Some(&bearer))?
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(profile);
        Self::send_empty(request).await
    }

    async fn get_profile(&self, id_or_email: &str) -> AuthResult<Option<Profile>> {
        // `id` is a uuid column; comparing it against an email is a type
        // error on the server, so emails only filter on `email`.
        let query = if uuid::Uuid::parse_str(id_or_email).is_ok() {
            vec![
                ("select", "*".to_string()),
                ("or", format!("(id.eq.{0},email.eq.{0})", id_or_email)),
                ("limit", "1".to_string()),
            ]
        } else {
            vec![
                ("select", "*".to_string()),
                ("email", format!("eq.{}", id_or_email)),
                ("limit", "1".to_string()),
            ]
        };
        let mut rows: Vec<Profile> = self.select("profiles", &query).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }
}

#[async_trait]
impl RecordStore for RemoteAdapter {
    async fn insert_comment(&self, comment: Comment) -> AuthResult<Comment> {
        let row = NewComment {
            user_id: &comment.user_id,
            content_type: comment.content_type,
            content_id: &comment.content_id,
            body: &comment.body,
        };
        let stored: Option<Comment> = self.insert_returning("comments", &row).await?;
        Ok(stored.unwrap_or(comment))
    }

    async fn list_comments(&self, kind: ContentKind, content_id: &str) -> AuthResult<Vec<Comment>> {
        self.select(
            "comments",
            &[
                ("select", "*".to_string()),
                ("content_type", format!("eq.{}", kind)),
                ("content_id", format!("eq.{}", content_id)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn get_comment(&self, id: &str) -> AuthResult<Option<Comment>> {
        let mut rows: Vec<Comment> = self
            .select(
                "comments",
                &[
                    ("select", "*".to_string()),
                    ("id", format!("eq.{}", id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    async fn update_comment_body(&self, id: &str, body: &str) -> AuthResult<()> {
        let bearer = self.bearer().await;
        let request = self
            .request(Method::PATCH, "rest/v1/comments", Some(&bearer))?
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "body": body }));
        Self::send_empty(request).await
    }

    async fn insert_content(&self, kind: ContentKind, item: ContentItem) -> AuthResult<ContentItem> {
        let stored: Option<ContentItem> = self.insert_returning(kind.table(), &item).await?;
        Ok(stored.unwrap_or(item))
    }

    async fn list_content(&self, kind: ContentKind) -> AuthResult<Vec<ContentItem>> {
        self.select(
            kind.table(),
            &[
                ("select", "*".to_string()),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }
}

/// Pull the human-readable message out of an error body. GoTrue and
/// PostgREST disagree on the field name.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(Value::String(msg)) = map.get(key) {
                if !msg.is_empty() {
                    return msg.clone();
                }
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        format!("Request failed with status {}", status)
    } else {
        format!("Request failed with status {}: {}", status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_known_fields() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"code":400,"msg":"User already registered"}"#),
            "User already registered"
        );
        assert_eq!(
            error_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#
            ),
            "Invalid login credentials"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, ""),
            "Request failed with status 502 Bad Gateway"
        );
    }

    #[test]
    fn user_metadata_is_flattened_to_strings() {
        let raw: GoTrueUser = serde_json::from_str(
            r#"{"id":"u-1","email":"a@x.com","user_metadata":{"first_name":"Asha","age":9,"tags":["x"]}}"#,
        )
        .unwrap();
        let user = raw.normalize();
        assert_eq!(user.metadata.get("first_name").map(String::as_str), Some("Asha"));
        assert_eq!(user.metadata.get("age").map(String::as_str), Some("9"));
        assert!(!user.metadata.contains_key("tags"));
    }

    #[test]
    fn sign_up_response_distinguishes_pending_confirmation() {
        let pending: SignUpResponse =
            serde_json::from_str(r#"{"id":"u-1","email":"a@x.com"}"#).unwrap();
        assert!(matches!(pending, SignUpResponse::User(_)));

        let session: SignUpResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":3600,"user":{"id":"u-1"}}"#,
        )
        .unwrap();
        assert!(matches!(session, SignUpResponse::Session(_)));
    }

    #[tokio::test]
    async fn invalid_url_is_backend_unavailable() {
        let kv = KvStore::new(crate::db::memory_pool().unwrap());
        let config = RemoteConfig {
            url: "not a url".into(),
            anon_key: "key".into(),
            ..Default::default()
        };
        let err = RemoteAdapter::connect(&config, kv).await.err().unwrap();
        assert!(matches!(err, AuthError::BackendUnavailable(_)));
    }
}
