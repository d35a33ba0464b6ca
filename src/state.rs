use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::task::JoinHandle;

use crate::auth::{Auth, AuthArea};
use crate::config::Config;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub auth: Arc<Auth>,
    pub auth_area: Arc<AuthArea>,
}

impl AppState {
    pub fn new(config: Config, auth: Arc<Auth>) -> Self {
        let auth_area = AuthArea::new(auth.clone(), &config.site);
        Self {
            config,
            auth,
            auth_area,
        }
    }

    /// Start the auth listener and the first render, which fulfils the
    /// readiness signal. A profile stashed before confirmation is created
    /// first when a session is already present.
    pub fn start(&self) -> JoinHandle<()> {
        match self.auth_area.spawn_listener() {
            Some(_) => tracing::debug!("Listening for auth state changes"),
            None => tracing::debug!("Backend has no auth state stream"),
        }

        let auth = self.auth.clone();
        let area = self.auth_area.clone();
        tokio::spawn(async move {
            if let Err(e) = auth.flush_pending_profile().await {
                tracing::warn!("Pending profile not created: {}", e);
            }
            let view = area.render().await;
            tracing::info!(
                "Auth area ready ({})",
                if view.signed_in.is_some() { "signed in" } else { "signed out" }
            );
        })
    }
}
