//! Sequenced identity resolution.
//!
//! The session is resolved first, then the roles for that session, and only
//! then is a single [`IdentityState`] published. Dependents observe the
//! state through a `watch` channel and never call back into this module
//! while it is resolving.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use ridesync_core::db::StoreError;
use ridesync_core::identity::{AuthProvider, Principal, RoleDirectory};
use ridesync_core::model::UserId;

use crate::error::RideError;

/// What dependents know about the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    /// A session change is being resolved.
    Resolving,
    SignedOut,
    Ready(Principal),
}

impl IdentityState {
    pub const fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Ready(principal) => Some(principal),
            Self::Resolving | Self::SignedOut => None,
        }
    }
}

/// Owns the identity state and the task following session changes.
pub struct IdentityContext {
    auth: Arc<dyn AuthProvider>,
    roles: Arc<dyn RoleDirectory>,
    state: Arc<watch::Sender<IdentityState>>,
    _follower: DropGuard,
}

impl IdentityContext {
    /// Resolve the current session and its roles, then follow sign-in and
    /// sign-out for as long as the context lives.
    pub async fn start(
        auth: Arc<dyn AuthProvider>,
        roles: Arc<dyn RoleDirectory>,
    ) -> Result<Self, StoreError> {
        let mut changes = auth.session_changes();
        changes.borrow_and_update();

        let user = auth.current_session().await?;
        let initial = resolve(roles.as_ref(), user).await?;
        info!(state = ?initial, "Identity resolved");

        let (state, _) = watch::channel(initial);
        let state = Arc::new(state);
        let token = CancellationToken::new();
        tokio::spawn(follow_sessions(
            changes,
            Arc::clone(&roles),
            Arc::clone(&state),
            token.clone(),
        ));

        Ok(Self {
            auth,
            roles,
            state,
            _follower: token.drop_guard(),
        })
    }

    pub fn state(&self) -> IdentityState {
        self.state.borrow().clone()
    }

    pub fn principal(&self) -> Option<Principal> {
        self.state.borrow().principal().cloned()
    }

    /// The bound principal, or [`RideError::Authentication`].
    pub fn require_principal(&self) -> Result<Principal, RideError> {
        self.principal().ok_or(RideError::Authentication)
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.state.subscribe()
    }

    /// Re-read roles after an out-of-band change to the role table.
    pub async fn refresh_roles(&self) -> Result<(), StoreError> {
        let user = self.auth.current_session().await?;
        let next = resolve(self.roles.as_ref(), user).await?;
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                info!(state = ?next, "Roles refreshed");
                *current = next;
                true
            }
        });
        Ok(())
    }
}

async fn resolve(
    roles: &dyn RoleDirectory,
    user: Option<UserId>,
) -> Result<IdentityState, StoreError> {
    match user {
        None => Ok(IdentityState::SignedOut),
        Some(user) => {
            let roles = roles.roles_for(&user).await?;
            Ok(IdentityState::Ready(Principal { id: user, roles }))
        }
    }
}

async fn follow_sessions(
    mut changes: watch::Receiver<Option<UserId>>,
    roles: Arc<dyn RoleDirectory>,
    state: Arc<watch::Sender<IdentityState>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("Session source closed");
                    break;
                }
                let user = changes.borrow_and_update().clone();
                state.send_replace(IdentityState::Resolving);
                let next = match resolve(roles.as_ref(), user).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(error = %e, "Role lookup failed, treating session as signed out");
                        IdentityState::SignedOut
                    }
                };
                info!(state = ?next, "Identity changed");
                state.send_replace(next);
            }
        }
    }
}
