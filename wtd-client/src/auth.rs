//! Signed-in identity, shared between the HTTP client and its subscribers.
//!
//! The backend issues access tokens elsewhere; this handle only holds the
//! current session and announces every change on a watch channel. Token
//! refreshes for the same user are announced too, so subscribers must treat
//! repeated identities as no-ops.

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::info;
use wtd_core::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: UserId,
    pub access_token: String,
}

impl AuthSession {
    pub fn new(user_id: impl Into<UserId>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityHandle {
    session: Arc<RwLock<Option<AuthSession>>>,
    changes: Arc<watch::Sender<Option<UserId>>>,
}

impl Default for IdentityHandle {
    fn default() -> Self {
        Self::new(None)
    }
}

impl IdentityHandle {
    pub fn new(initial: Option<AuthSession>) -> Self {
        let (changes, _) = watch::channel(initial.as_ref().map(|s| s.user_id.clone()));
        Self {
            session: Arc::new(RwLock::new(initial)),
            changes: Arc::new(changes),
        }
    }

    /// Receivers start with the current identity already marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.changes.subscribe()
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.current().map(|s| s.user_id)
    }

    pub fn access_token(&self) -> Option<String> {
        self.current().map(|s| s.access_token)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current().is_some()
    }

    pub fn sign_in(&self, session: AuthSession) {
        info!("Signed in as {}", session.user_id);
        let user_id = session.user_id.clone();
        self.replace(Some(session));
        self.changes.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        if self.replace(None).is_some() {
            info!("Signed out");
        }
        self.changes.send_replace(None);
    }

    fn replace(&self, session: Option<AuthSession>) -> Option<AuthSession> {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, session)
    }
}
