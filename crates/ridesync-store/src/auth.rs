//! Local identity provider and the `SQLite` role directory.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use ridesync_core::db::StoreError;
use ridesync_core::identity::{AuthProvider, RoleDirectory, RoleSet};
use ridesync_core::model::UserId;

use crate::db::Database;

/// In-process session holder. Sign-in and sign-out are explicit calls.
#[derive(Debug)]
pub struct LocalAuth {
    session: watch::Sender<Option<UserId>>,
}

impl LocalAuth {
    /// Provider with no active session.
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self { session }
    }

    /// Provider already signed in as `user`.
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        let (session, _) = watch::channel(Some(user.into()));
        Self { session }
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        let user = user.into();
        info!(user_id = %user, "Signed in");
        self.session.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if self.session.send_replace(None).is_some() {
            info!("Signed out");
        }
    }
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn current_session(&self) -> Result<Option<UserId>, StoreError> {
        Ok(self.session.borrow().clone())
    }

    fn session_changes(&self) -> watch::Receiver<Option<UserId>> {
        self.session.subscribe()
    }
}

/// Role lookups against the `user_roles` table.
#[derive(Clone)]
pub struct SqliteRoleDirectory {
    db: Database,
}

impl SqliteRoleDirectory {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RoleDirectory for SqliteRoleDirectory {
    async fn roles_for(&self, user: &UserId) -> Result<RoleSet, StoreError> {
        self.db.roles_for(user).await
    }
}
