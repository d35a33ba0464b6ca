//! Auth-area view model and the readiness gate.
//!
//! [`AuthArea::render`] resolves the current user through the facade,
//! computes what the header should show and publishes it on a watch channel.
//! The first completed render fulfils the [`ReadySignal`]; anything that
//! decides UI from "is someone signed in" awaits it first.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::auth::{Auth, AuthResult};
use crate::config::SiteConfig;
use crate::db::models::{Profile, User};

/// One-shot gate: fulfilled once, never reset.
#[derive(Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true only for the call that performed the transition.
    pub fn fulfill(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot close early.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Unresolved,
    Resolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedInView {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthAreaView {
    pub signed_in: Option<SignedInView>,
    /// Sign-in / sign-up links when nobody is signed in.
    pub show_auth_links: bool,
    /// Text of the brand heading: the user's name, or the site title.
    pub brand_title: String,
}

impl AuthAreaView {
    fn signed_out(site_title: &str, show_auth_links: bool) -> Self {
        Self {
            signed_in: None,
            show_auth_links,
            brand_title: site_title.to_string(),
        }
    }

    pub fn greeting(&self) -> Option<String> {
        self.signed_in
            .as_ref()
            .map(|s| format!("Welcome {}", s.display_name))
    }
}

/// Name for the greeting: profile first name, then metadata `first_name`,
/// `name`, `username`, then the local part of the email. First word only.
pub fn display_name(profile: Option<&Profile>, user: &User) -> String {
    let profile_first = profile.and_then(|p| p.first_name.as_deref());
    let metadata = ["first_name", "name", "username"]
        .into_iter()
        .filter_map(|key| user.metadata.get(key).map(String::as_str));
    let local_part = user.email.split('@').next();

    profile_first
        .into_iter()
        .chain(metadata)
        .chain(local_part)
        .find_map(|candidate| candidate.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

pub struct AuthArea {
    auth: Arc<Auth>,
    site_title: String,
    show_auth_links: bool,
    ready: ReadySignal,
    view: watch::Sender<AuthAreaView>,
}

impl AuthArea {
    pub fn new(auth: Arc<Auth>, site: &SiteConfig) -> Arc<Self> {
        let initial = AuthAreaView::signed_out(&site.title, site.show_auth_links);
        let (view, _rx) = watch::channel(initial);
        Arc::new(Self {
            auth,
            site_title: site.title.clone(),
            show_auth_links: site.show_auth_links,
            ready: ReadySignal::new(),
            view,
        })
    }

    pub fn auth(&self) -> &Arc<Auth> {
        &self.auth
    }

    pub fn ready(&self) -> &ReadySignal {
        &self.ready
    }

    pub fn state(&self) -> RenderState {
        if self.ready.is_ready() {
            RenderState::Resolved
        } else {
            RenderState::Unresolved
        }
    }

    /// Latest published view.
    pub fn current(&self) -> AuthAreaView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthAreaView> {
        self.view.subscribe()
    }

    pub async fn render(&self) -> AuthAreaView {
        let user = match self.auth.current_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Could not resolve current user, rendering signed out: {}", e);
                None
            }
        };

        let view = match user {
            Some(user) => {
                let profile = match self.auth.get_profile(&user.id).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        tracing::debug!("Profile lookup for {} failed: {}", user.email, e);
                        None
                    }
                };
                let name = display_name(profile.as_ref(), &user);
                AuthAreaView {
                    signed_in: Some(SignedInView {
                        user_id: user.id,
                        email: user.email,
                        display_name: name.clone(),
                    }),
                    show_auth_links: self.show_auth_links,
                    brand_title: name,
                }
            }
            None => AuthAreaView::signed_out(&self.site_title, self.show_auth_links),
        };

        self.view.send_replace(view.clone());
        if self.ready.fulfill() {
            tracing::debug!("First auth-area render complete");
        }
        view
    }

    pub async fn logout(&self) -> AuthResult<AuthAreaView> {
        self.auth.sign_out().await?;
        Ok(self.render().await)
    }

    /// Re-render on every backend session change. `None` when the backend
    /// has no change stream.
    pub fn spawn_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.auth.on_auth_state_change()?;
        let area = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!("Re-rendering auth area after {:?}", event);
                        area.render().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Auth listener skipped {} events", skipped);
                        area.render().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}
