//! Record-store seam consumed by the synchronization engines.
//!
//! Every call carries the acting [`Principal`]: the store enforces row-level
//! security for it, the same way a hosted backend evaluates policies against
//! the session token of the client.

use async_trait::async_trait;

use crate::db::StoreError;
use crate::feed::{ChangeKinds, Subscription};
use crate::identity::Principal;
use crate::model::{ActivityLogEntry, NewRide, RideFilter, RidePatch, RideRequest};

/// Typed access to the ride-request and activity-log tables.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows matching `filter` that `actor` may read, newest first.
    async fn select_rides(
        &self,
        actor: &Principal,
        filter: &RideFilter,
    ) -> Result<Vec<RideRequest>, StoreError>;

    /// Insert a ride owned by `actor` in the `requested` state.
    async fn insert_ride(&self, actor: &Principal, ride: &NewRide)
    -> Result<RideRequest, StoreError>;

    /// Conditional update. Returns the number of rows changed; rows that do
    /// not match `filter`, or that `actor` may not write, are left alone.
    async fn update_rides(
        &self,
        actor: &Principal,
        patch: &RidePatch,
        filter: &RideFilter,
    ) -> Result<u64, StoreError>;

    /// Most recent activity entries `actor` may read, newest first.
    async fn select_activity(
        &self,
        actor: &Principal,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, StoreError>;

    /// Live ride changes visible to `actor`.
    async fn subscribe_rides(
        &self,
        actor: &Principal,
        kinds: ChangeKinds,
    ) -> Result<Subscription<RideRequest>, StoreError>;

    /// Live activity-log inserts visible to `actor`.
    async fn subscribe_activity(
        &self,
        actor: &Principal,
    ) -> Result<Subscription<ActivityLogEntry>, StoreError>;
}
