//! A CLI invocation's view of the world: config, store and identity.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::debug;

use ridesync_core::config::Config;
use ridesync_core::{Principal, RecordStore};
use ridesync_engine::{Dashboard, IdentityContext, RideSyncEngine, toast};
use ridesync_store::{Database, LocalAuth, SqliteRoleDirectory, SqliteStore};

pub struct Session {
    config: Config,
    store: Arc<SqliteStore>,
    identity: IdentityContext,
}

impl Session {
    /// Open the configured store and sign in as `user`, if given.
    pub async fn open(config: Config, user: Option<&str>) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.store).await?);
        Self::with_store(config, store, user).await
    }

    pub async fn with_store(
        config: Config,
        store: Arc<SqliteStore>,
        user: Option<&str>,
    ) -> anyhow::Result<Self> {
        let auth = Arc::new(user.map_or_else(LocalAuth::new, LocalAuth::signed_in));
        let roles = Arc::new(SqliteRoleDirectory::new(store.database().clone()));
        let identity = IdentityContext::start(auth, roles).await?;
        debug!(state = ?identity.state(), "Session opened");
        Ok(Self {
            config,
            store,
            identity,
        })
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        self.store.database()
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub const fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    /// The signed-in principal, or the sign-in toast as an error.
    pub fn principal(&self) -> anyhow::Result<Principal> {
        self.identity.require_principal().map_err(|e| anyhow!(toast(&e)))
    }

    /// Mount a bare ride engine and wait for its first fetch.
    pub async fn engine(&self) -> RideSyncEngine {
        let engine = RideSyncEngine::mount(self.store(), self.identity.subscribe(), &self.config.sync);
        engine.loaded().await;
        engine
    }

    /// Mount the principal's dashboard and wait for its first fetch.
    pub async fn dashboard(&self) -> anyhow::Result<Dashboard> {
        let dashboard = Dashboard::mount(&self.store(), &self.identity, &self.config)
            .map_err(|e| anyhow!(toast(&e)))?;
        dashboard.loaded().await;
        Ok(dashboard)
    }
}
