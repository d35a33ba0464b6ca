pub mod facade;
pub mod local;
pub mod remote;
pub mod render;
pub mod session;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::db::models::{Comment, ContentItem, ContentKind, Metadata, Profile, User};
use crate::db::StoreError;

pub use facade::{Auth, AuthStatus, BackendKind};
pub use local::LocalAdapter;
pub use remote::RemoteAdapter;
pub use render::{AuthArea, AuthAreaView, ReadySignal};

/// Failures of any auth or record operation. The `Display` text is what the
/// site shows to the user.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email and password required")]
    MissingCredentials,

    #[error("User already exists")]
    DuplicateUser,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{0}")]
    RemoteOperationFailed(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Not allowed")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
}

impl AuthError {
    /// Errors a form page shows inline instead of failing the request.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AuthError::MissingCredentials
                | AuthError::DuplicateUser
                | AuthError::InvalidCredentials
                | AuthError::Validation(_)
                | AuthError::RemoteOperationFailed(_)
        )
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Session transitions announced by backends that have a push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(User),
    SignedOut,
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: Option<User>,
    /// False when the backend still wants the address confirmed; no session
    /// exists yet in that case.
    pub confirmed: bool,
}

/// Account and profile operations.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Metadata,
    ) -> AuthResult<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<User>;

    async fn sign_out(&self) -> AuthResult<()>;

    async fn current_user(&self) -> AuthResult<Option<User>>;

    /// `None` for backends that never change session state on their own.
    fn on_auth_state_change(&self) -> Option<broadcast::Receiver<AuthEvent>>;

    async fn upsert_profile(&self, profile: &Profile) -> AuthResult<()>;

    /// Looks up by id, then by email. Never creates a profile.
    async fn get_profile(&self, id_or_email: &str) -> AuthResult<Option<Profile>>;
}

/// Table-like storage for comments and content.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_comment(&self, comment: Comment) -> AuthResult<Comment>;

    /// Newest first.
    async fn list_comments(&self, kind: ContentKind, content_id: &str) -> AuthResult<Vec<Comment>>;

    async fn get_comment(&self, id: &str) -> AuthResult<Option<Comment>>;

    async fn update_comment_body(&self, id: &str, body: &str) -> AuthResult<()>;

    async fn insert_content(&self, kind: ContentKind, item: ContentItem) -> AuthResult<ContentItem>;

    /// Oldest first.
    async fn list_content(&self, kind: ContentKind) -> AuthResult<Vec<ContentItem>>;
}

pub trait Backend: AuthBackend + RecordStore {}

impl<T: AuthBackend + RecordStore> Backend for T {}
