use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::auth::local::LocalAdapter;
use crate::auth::remote::RemoteAdapter;
use crate::auth::{AuthError, AuthEvent, AuthResult, Backend, SignUpOutcome};
use crate::config::{AuthConfig, RemoteConfig};
use crate::db::kv::PENDING_PROFILE_KEY;
use crate::db::models::{Metadata, Profile, ProfileDraft, User};
use crate::db::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Demo,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Remote => f.write_str("Remote"),
            BackendKind::Demo => f.write_str("Demo"),
        }
    }
}

/// Which backend was picked and why. Diagnostic only: shown on the status
/// banner, never consulted for control flow.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthStatus {
    pub backend: BackendKind,
    pub init_error: Option<String>,
}

impl AuthStatus {
    pub fn summary(&self) -> String {
        match &self.init_error {
            Some(err) => format!("Auth: {} ({})", self.backend, err),
            None => format!("Auth: {}", self.backend),
        }
    }
}

/// Single entry point over the selected backend. The choice is made once in
/// [`Auth::from_config`] and every call goes entirely to that backend.
pub struct Auth {
    backend: Arc<dyn Backend>,
    remote: Option<Arc<RemoteAdapter>>,
    kv: KvStore,
    status: AuthStatus,
}

impl Auth {
    pub async fn from_config(
        remote: &RemoteConfig,
        auth: &AuthConfig,
        kv: KvStore,
        content_dir: Option<&Path>,
    ) -> Self {
        let mut local = LocalAdapter::new(kv.clone()).with_bcrypt_cost(auth.bcrypt_cost);
        if let Some(dir) = content_dir {
            local = local.with_fixtures_dir(dir);
        }

        if !remote.is_configured() {
            tracing::info!("Remote auth not configured; using demo store");
            return Self::demo(local, kv, Some("missing remote url or anon key".to_string()));
        }

        match RemoteAdapter::connect(remote, kv.clone()).await {
            Ok(adapter) => Self::remote(Arc::new(adapter), kv),
            Err(e) => {
                tracing::warn!("Remote auth unavailable, falling back to demo store: {}", e);
                Self::demo(local, kv, Some(e.to_string()))
            }
        }
    }

    pub fn demo(local: LocalAdapter, kv: KvStore, init_error: Option<String>) -> Self {
        Self {
            backend: Arc::new(local),
            remote: None,
            kv,
            status: AuthStatus {
                backend: BackendKind::Demo,
                init_error,
            },
        }
    }

    pub fn remote(adapter: Arc<RemoteAdapter>, kv: KvStore) -> Self {
        Self {
            backend: adapter.clone(),
            remote: Some(adapter),
            kv,
            status: AuthStatus {
                backend: BackendKind::Remote,
                init_error: None,
            },
        }
    }

    pub fn status(&self) -> &AuthStatus {
        &self.status
    }

    pub fn is_remote(&self) -> bool {
        self.status.backend == BackendKind::Remote
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Metadata,
    ) -> AuthResult<SignUpOutcome> {
        self.backend.sign_up(email, password, metadata).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<User> {
        self.backend.sign_in(email, password).await
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.backend.sign_out().await
    }

    pub async fn current_user(&self) -> AuthResult<Option<User>> {
        self.backend.current_user().await
    }

    pub fn on_auth_state_change(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        self.backend.on_auth_state_change()
    }

    pub async fn upsert_profile(&self, profile: &Profile) -> AuthResult<()> {
        self.backend.upsert_profile(profile).await
    }

    pub async fn get_profile(&self, id_or_email: &str) -> AuthResult<Option<Profile>> {
        self.backend.get_profile(id_or_email).await
    }

    /// Accept tokens from an email-confirmation redirect. Remote only.
    pub async fn adopt_session(&self, access_token: &str, refresh_token: &str) -> AuthResult<User> {
        match &self.remote {
            Some(remote) => remote.adopt_session(access_token, refresh_token).await,
            None => Err(AuthError::Validation(
                "Session links need the remote backend".into(),
            )),
        }
    }

    /// Sign up and attach the profile. When the backend still wants the
    /// address confirmed the profile is stashed and created later by
    /// [`Auth::flush_pending_profile`].
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        mut draft: ProfileDraft,
    ) -> AuthResult<SignUpOutcome> {
        if draft.email.trim().is_empty() {
            draft.email = email.trim().to_string();
        }
        let outcome = self.sign_up(email, password, draft.metadata()).await?;

        match (&outcome.user, outcome.confirmed) {
            (Some(user), true) => {
                if let Err(e) = self.upsert_profile(&draft.into_profile(&user.id)).await {
                    tracing::warn!("Profile creation after sign-up failed: {}", e);
                }
            }
            _ => self.stash_pending_profile(&draft)?,
        }
        Ok(outcome)
    }

    pub fn stash_pending_profile(&self, draft: &ProfileDraft) -> AuthResult<()> {
        self.kv.set_json(PENDING_PROFILE_KEY, draft)?;
        Ok(())
    }

    /// Create the stashed profile once someone is signed in. Returns true
    /// when a profile was written and the stash cleared.
    pub async fn flush_pending_profile(&self) -> AuthResult<bool> {
        let Some(draft) = self.kv.get_json::<ProfileDraft>(PENDING_PROFILE_KEY)? else {
            return Ok(false);
        };
        let Some(user) = self.current_user().await? else {
            return Ok(false);
        };

        self.upsert_profile(&draft.into_profile(&user.id)).await?;
        self.kv.remove(PENDING_PROFILE_KEY)?;
        tracing::info!("Created pending profile for {}", user.email);
        Ok(true)
    }
}
