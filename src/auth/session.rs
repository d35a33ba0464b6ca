use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::User;

/// Demo-store session marker. At most one exists per profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSession {
    pub email: String,
    pub issued_at: DateTime<Utc>,
}

impl LocalSession {
    pub fn issue(email: &str) -> Self {
        Self {
            email: email.to_string(),
            issued_at: Utc::now(),
        }
    }
}

/// Session held for the remote identity service. Mirrored to the key/value
/// store so a restart keeps the user signed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl RemoteSession {
    /// True when the access token expires within `margin`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at <= now + margin
    }
}
