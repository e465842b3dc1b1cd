//! Authentication context as seen by the metrics layer
//!
//! Only the current user id and readiness matter here; the sign-in flow
//! itself lives elsewhere.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user_id: Option<String>,
    /// Auth provider still resolving the session
    pub loading: bool,
}

impl AuthState {
    /// Resolved and signed in
    pub fn is_ready(&self) -> bool {
        !self.loading && self.user_id.is_some()
    }
}

/// Observable authentication state
#[derive(Debug, Clone)]
pub struct AuthContext {
    state: Arc<watch::Sender<AuthState>>,
}

impl AuthContext {
    /// Start in the resolving state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState {
            user_id: None,
            loading: true,
        });
        Self { state: Arc::new(tx) }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        self.state.send_replace(AuthState {
            user_id: Some(user_id),
            loading: false,
        });
    }

    pub fn sign_out(&self) {
        self.state.send_replace(AuthState {
            user_id: None,
            loading: false,
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.state.send_modify(|state| state.loading = loading);
    }

    pub fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<String> {
        self.state.borrow().user_id.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new()
    }
}
