//! Session Gate: the external identity collaborator.
//!
//! The broker only listens for sign-in/sign-out transitions and asks who
//! the current user is; it never initiates authentication itself.

use std::sync::RwLock;

use tokio::sync::broadcast;

use crate::types::{AuthEvent, User};

const AUTH_EVENT_BUFFER: usize = 16;

pub trait SessionGate: Send + Sync {
    /// The currently signed-in user, if any.
    fn current_user(&self) -> Option<User>;

    /// Opens a feed of authentication transitions.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// In-process session gate.
///
/// Stands in for the external identity service in tests and offline
/// embeddings; an embedder bridging a real identity provider forwards its
/// auth callbacks into `sign_in` / `sign_out`.
pub struct LocalSessionGate {
    user: RwLock<Option<User>>,
    events: broadcast::Sender<AuthEvent>,
}

impl LocalSessionGate {
    pub fn new() -> Self {
        Self {
            user: RwLock::new(None),
            events: broadcast::channel(AUTH_EVENT_BUFFER).0,
        }
    }

    pub fn sign_in(&self, user: User) {
        tracing::debug!(
            target: "devconnect::session",
            "Signing in user {}",
            user.id
        );
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user.clone());
        // No receivers yet is fine; the event is simply unobserved.
        let _ = self.events.send(AuthEvent::SignedIn(user));
    }

    pub fn sign_out(&self) {
        tracing::debug!(target: "devconnect::session", "Signing out");
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
        let _ = self.events.send(AuthEvent::SignedOut);
    }
}

impl Default for LocalSessionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate for LocalSessionGate {
    fn current_user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
