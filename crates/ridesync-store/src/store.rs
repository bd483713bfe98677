//! `SQLite`-backed [`RecordStore`] with a live change feed.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use ridesync_core::config::StoreConfig;
use ridesync_core::db::StoreError;
use ridesync_core::feed::{ChangeEvent, ChangeKinds, Subscription};
use ridesync_core::identity::{Principal, Role};
use ridesync_core::model::{
    ActivityLogEntry, NewRide, RideFilter, RideId, RidePatch, RideRequest,
};
use ridesync_core::store::RecordStore;

use crate::db::Database;
use crate::feed::{ChangeHub, FeedStats};
use crate::policy;
use crate::queries::WriteOutcome;

/// Record store over a local `SQLite` database.
///
/// Writes are serialised so change events leave the hub in commit order.
pub struct SqliteStore {
    db: Database,
    hub: ChangeHub,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open the database named by `config`, creating it if needed.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| StoreError::Io("no data directory for the ride database".into()))?;
        let db = Database::open(&path, config.pool_options()).await?;
        Ok(Self::with_database(db, config.feed_capacity))
    }

    /// Private in-memory store (for testing).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let db = Database::open_in_memory().await?;
        Ok(Self::with_database(db, StoreConfig::default().feed_capacity))
    }

    pub fn with_database(db: Database, feed_capacity: usize) -> Self {
        Self {
            db,
            hub: ChangeHub::new(feed_capacity),
            write_lock: Mutex::new(()),
        }
    }

    pub const fn database(&self) -> &Database {
        &self.db
    }

    pub fn feed_stats(&self) -> FeedStats {
        self.hub.stats()
    }

    /// Remove a ride. Admin only; the activity log keeps its entries.
    pub async fn purge_ride(&self, actor: &Principal, id: &RideId) -> Result<bool, StoreError> {
        if !actor.has_role(Role::Admin) {
            return Err(StoreError::PermissionDenied(format!(
                "{} cannot purge rides",
                actor.id
            )));
        }

        let _guard = self.write_lock.lock().await;
        let removed = self.db.delete_ride(id).await?;
        if removed {
            info!(ride_id = %id, actor = %actor.id, "Ride purged");
            self.hub.publish_rides([ChangeEvent::Delete(id.clone())]);
        }
        Ok(removed)
    }

    fn publish(&self, outcome: &WriteOutcome, inserted: bool) {
        self.hub.publish_rides(outcome.rides.iter().cloned().map(|ride| {
            if inserted {
                ChangeEvent::Insert(ride)
            } else {
                ChangeEvent::Update(ride)
            }
        }));
        self.hub
            .publish_activity(outcome.activity.iter().cloned().map(ChangeEvent::Insert));
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn select_rides(
        &self,
        actor: &Principal,
        filter: &RideFilter,
    ) -> Result<Vec<RideRequest>, StoreError> {
        self.db.select_rides(actor, filter).await
    }

    async fn insert_ride(
        &self,
        actor: &Principal,
        ride: &NewRide,
    ) -> Result<RideRequest, StoreError> {
        policy::check_insert(actor)?;

        let _guard = self.write_lock.lock().await;
        let outcome = self.db.insert_ride(&actor.id, ride).await?;
        self.publish(&outcome, true);

        let ride = outcome
            .rides
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Query("insert returned no row".into()))?;
        debug!(ride_id = %ride.id, rider_id = %ride.rider_id, "Ride inserted");
        Ok(ride)
    }

    async fn update_rides(
        &self,
        actor: &Principal,
        patch: &RidePatch,
        filter: &RideFilter,
    ) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let outcome = self.db.update_rides(actor, patch, filter).await?;
        self.publish(&outcome, false);

        let affected = outcome.rides.len() as u64;
        debug!(actor = %actor.id, affected, "Rides updated");
        Ok(affected)
    }

    async fn select_activity(
        &self,
        actor: &Principal,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, StoreError> {
        self.db.select_activity(actor, limit).await
    }

    async fn subscribe_rides(
        &self,
        actor: &Principal,
        kinds: ChangeKinds,
    ) -> Result<Subscription<RideRequest>, StoreError> {
        Ok(self.hub.subscribe_rides(actor.clone(), kinds))
    }

    async fn subscribe_activity(
        &self,
        actor: &Principal,
    ) -> Result<Subscription<ActivityLogEntry>, StoreError> {
        if policy::can_read_activity(actor) {
            Ok(self.hub.subscribe_activity())
        } else {
            Ok(Subscription::inert("activity_log"))
        }
    }
}
