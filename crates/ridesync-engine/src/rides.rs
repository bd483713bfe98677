//! Ride synchronization engine.
//!
//! Keeps a per-client cache of the rides the current principal may see and
//! reconciles it with the store's change feed:
//!
//! 1. subscribe to the ride feed
//! 2. bulk-fetch the visible rows and replace the cache
//! 3. merge every streamed event by id
//!
//! Steps 1 and 2 overlap on purpose; merging by id makes replayed events
//! harmless. A gap in the feed, a periodic tick, or an identity change
//! triggers a fresh bulk fetch.
//!
//! Mutations never touch the cache optimistically. The store's affected-row
//! count is the only answer to "did my write apply", and the resulting rows
//! arrive through the feed like any other change.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ridesync_core::config::SyncConfig;
use ridesync_core::db::{StoreError, now_millis};
use ridesync_core::feed::{ChangeEvent, ChangeKinds, FeedItem, Subscription};
use ridesync_core::identity::Principal;
use ridesync_core::model::{NewRide, RideFilter, RideId, RidePatch, RideRequest, RideTransition};
use ridesync_core::store::RecordStore;

use crate::client::{bounded, retry_at, sleep_until};
use crate::error::{Operation, RideError};
use crate::identity::IdentityState;

/// Result of a conditional mutation that was accepted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The row matched and was changed.
    Applied,
    /// Nothing matched, e.g. another driver accepted the ride first.
    NoOp,
}

/// Rows visible to one principal, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RideCache {
    rows: Vec<RideRequest>,
}

impl RideCache {
    /// Replace the whole cache with a fresh fetch.
    pub fn replace_all(&mut self, mut rows: Vec<RideRequest>, scope: &Principal) {
        rows.retain(|ride| scope.can_see_ride(ride));
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.rows = rows;
    }

    /// Merge one change event. Returns whether the cache changed.
    ///
    /// Inserts outside `scope` are dropped. Updates replace in place without
    /// re-sorting. Applying the same event twice is the same as applying it
    /// once.
    pub fn apply(&mut self, event: ChangeEvent<RideRequest>, scope: &Principal) -> bool {
        match event {
            ChangeEvent::Insert(row) => {
                if !scope.can_see_ride(&row) || self.position(&row.id).is_some() {
                    return false;
                }
                self.rows.insert(0, row);
                true
            }
            ChangeEvent::Update(row) => match self.position(&row.id) {
                Some(i) if self.rows[i] != row => {
                    self.rows[i] = row;
                    true
                }
                _ => false,
            },
            ChangeEvent::Delete(id) => match self.position(&id) {
                Some(i) => {
                    self.rows.remove(i);
                    true
                }
                None => false,
            },
        }
    }

    /// Merge a row returned directly by the store, e.g. after an insert.
    ///
    /// The feed can deliver later versions of the row before the store call
    /// returns, so a cached row with a newer `updated_at` wins.
    pub fn upsert(&mut self, row: RideRequest) -> bool {
        match self.position(&row.id) {
            Some(i) if self.rows[i] == row || self.rows[i].updated_at > row.updated_at => false,
            Some(i) => {
                self.rows[i] = row;
                true
            }
            None => {
                self.rows.insert(0, row);
                true
            }
        }
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.rows.is_empty();
        self.rows.clear();
        changed
    }

    pub fn get(&self, id: &RideId) -> Option<&RideRequest> {
        self.rows.iter().find(|ride| ride.id == *id)
    }

    pub fn rows(&self) -> &[RideRequest] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &RideRequest> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn position(&self, id: &RideId) -> Option<usize> {
        self.rows.iter().position(|ride| ride.id == *id)
    }
}

/// Observable engine state.
#[derive(Debug, Clone, Default)]
pub struct RideSnapshot {
    pub rides: RideCache,
    /// True until the first fetch for the current principal completes.
    pub loading: bool,
    /// Bumped on every observable change.
    pub revision: u64,
    /// The principal the cache is scoped to.
    pub principal: Option<Principal>,
    /// Last failed fetch, cleared by the next successful one.
    pub last_error: Option<RideError>,
    pending: BTreeMap<Operation, usize>,
}

impl RideSnapshot {
    pub fn is_pending(&self, operation: Operation) -> bool {
        self.pending.get(&operation).is_some_and(|n| *n > 0)
    }
}

type State = Arc<watch::Sender<RideSnapshot>>;

/// Change the snapshot, bumping the revision only when `f` reports a change.
fn update(state: &State, f: impl FnOnce(&mut RideSnapshot) -> bool) {
    state.send_if_modified(|snap| {
        let changed = f(snap);
        if changed {
            snap.revision += 1;
        }
        changed
    });
}

/// Marks an operation in flight until dropped.
struct Pending {
    state: State,
    operation: Operation,
}

impl Pending {
    fn begin(state: &State, operation: Operation) -> Self {
        update(state, |snap| {
            *snap.pending.entry(operation).or_default() += 1;
            true
        });
        Self {
            state: Arc::clone(state),
            operation,
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        let operation = self.operation;
        update(&self.state, |snap| {
            if let Some(n) = snap.pending.get_mut(&operation) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    snap.pending.remove(&operation);
                }
            }
            true
        });
    }
}

/// Ride cache plus lifecycle mutations for the current principal.
pub struct RideSyncEngine {
    store: Arc<dyn RecordStore>,
    identity: watch::Receiver<IdentityState>,
    state: State,
    timeout: Duration,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RideSyncEngine {
    /// Start syncing for whoever `identity` names. The first fetch runs in
    /// the background; await [`RideSyncEngine::loaded`] to wait for it.
    pub fn mount(
        store: Arc<dyn RecordStore>,
        identity: watch::Receiver<IdentityState>,
        config: &SyncConfig,
    ) -> Self {
        let initial = identity.borrow().clone();
        let (state, _) = watch::channel(RideSnapshot {
            loading: !matches!(initial, IdentityState::SignedOut),
            principal: initial.principal().cloned(),
            ..RideSnapshot::default()
        });
        let state = Arc::new(state);
        let shutdown = CancellationToken::new();

        let reconciler = Reconciler {
            store: Arc::clone(&store),
            state: Arc::clone(&state),
            timeout: config.operation_timeout(),
        };
        let task = tokio::spawn(reconciler.run(
            identity.clone(),
            config.resync_interval(),
            shutdown.clone(),
        ));

        Self {
            store,
            identity,
            state,
            timeout: config.operation_timeout(),
            shutdown,
            task: Some(task),
        }
    }

    pub fn snapshot(&self) -> RideSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every snapshot change.
    pub fn watch(&self) -> watch::Receiver<RideSnapshot> {
        self.state.subscribe()
    }

    pub fn is_pending(&self, operation: Operation) -> bool {
        self.state.borrow().is_pending(operation)
    }

    /// Wait until the current principal's first fetch has finished.
    pub async fn loaded(&self) -> RideSnapshot {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|snap| !snap.loading).await {
            Ok(snap) => snap.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Create a ride owned by the current principal.
    ///
    /// The returned row is merged into the cache immediately; the feed's own
    /// insert event for it is then a no-op.
    pub async fn request_ride(
        &self,
        pickup: &str,
        destination: &str,
        passenger_count: Option<i64>,
    ) -> Result<RideRequest, RideError> {
        let principal = self.require_principal()?;
        let ride = NewRide::new(pickup, destination, passenger_count)?;
        let operation = Operation::RequestRide;
        if !principal.can_request_rides() {
            return Err(RideError::forbidden(
                operation,
                "only riders and employees can request rides",
            ));
        }

        let _pending = Pending::begin(&self.state, operation);
        let row = bounded(self.timeout, operation, self.store.insert_ride(&principal, &ride)).await?;
        info!(ride_id = %row.id, rider_id = %principal.id, "Ride requested");

        let merged = row.clone();
        update(&self.state, |snap| {
            snap.principal.as_ref() == Some(&principal) && snap.rides.upsert(merged)
        });
        Ok(row)
    }

    /// Claim a requested ride for the current driver.
    ///
    /// Losing a race to another driver is [`MutationOutcome::NoOp`], not an
    /// error; the winner shows up in the ride's `driver_id` once reconciled.
    pub async fn accept_ride(&self, id: &RideId) -> Result<MutationOutcome, RideError> {
        let principal = self.require_principal()?;
        let operation = Operation::AcceptRide;
        if !principal.can_accept_rides() {
            return Err(RideError::forbidden(operation, "only drivers can accept rides"));
        }

        let affected = self.conditional(&principal, RideTransition::Accept, id).await?;
        if affected == 0 {
            info!(ride_id = %id, driver_id = %principal.id, "Ride already taken");
            Ok(MutationOutcome::NoOp)
        } else {
            info!(ride_id = %id, driver_id = %principal.id, "Ride accepted");
            Ok(MutationOutcome::Applied)
        }
    }

    pub async fn start_ride(&self, id: &RideId) -> Result<(), RideError> {
        self.guarded(RideTransition::Start, id).await
    }

    pub async fn complete_ride(&self, id: &RideId) -> Result<(), RideError> {
        self.guarded(RideTransition::Complete, id).await
    }

    pub async fn cancel_ride(&self, id: &RideId) -> Result<(), RideError> {
        self.guarded(RideTransition::Cancel, id).await
    }

    /// Stop reconciling and release the feed subscription.
    pub async fn unmount(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Ride reconciler ended abnormally");
        }
        debug!("Ride engine unmounted");
    }

    fn require_principal(&self) -> Result<Principal, RideError> {
        self.identity
            .borrow()
            .principal()
            .cloned()
            .ok_or(RideError::Authentication)
    }

    /// Transition that must apply. Zero affected rows is classified by
    /// re-reading the row.
    async fn guarded(&self, transition: RideTransition, id: &RideId) -> Result<(), RideError> {
        let principal = self.require_principal()?;
        let operation = Operation::for_transition(transition);

        if self.conditional(&principal, transition, id).await? > 0 {
            info!(ride_id = %id, actor = %principal.id, %transition, "Ride transitioned");
            return Ok(());
        }

        let current = bounded(
            self.timeout,
            operation,
            self.store.select_rides(&principal, &RideFilter::by_id(id)),
        )
        .await?;
        match current.first() {
            None => Err(RideError::store(
                operation,
                StoreError::NotFound(format!("ride {id}")),
            )),
            Some(ride) => {
                ride.status.check(transition)?;
                Err(RideError::forbidden(
                    operation,
                    format!("{} may not {transition} this ride", principal.id),
                ))
            }
        }
    }

    /// Issue the conditional update for `transition`, returning the
    /// affected-row count.
    async fn conditional(
        &self,
        principal: &Principal,
        transition: RideTransition,
        id: &RideId,
    ) -> Result<u64, RideError> {
        let operation = Operation::for_transition(transition);
        let _pending = Pending::begin(&self.state, operation);
        let patch = RidePatch::for_transition(transition, &principal.id, now_millis());
        let filter = RideFilter::by_id(id).with_statuses(transition.from_states());

        bounded(
            self.timeout,
            operation,
            self.store.update_rides(principal, &patch, &filter),
        )
        .await
    }
}

impl Drop for RideSyncEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Background side of the engine: owns the subscription.
struct Reconciler {
    store: Arc<dyn RecordStore>,
    state: State,
    timeout: Duration,
}

impl Reconciler {
    async fn run(
        self,
        mut identity: watch::Receiver<IdentityState>,
        resync: Option<Duration>,
        shutdown: CancellationToken,
    ) {
        let mut scope = identity.borrow_and_update().clone();
        let mut feed = self.bind(&scope).await;
        let mut retry = retry_at(scope.principal().is_some(), feed.as_ref());
        let mut timer = resync.map(|period| {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer.reset();
            timer
        });

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = identity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = identity.borrow_and_update().clone();
                    if next != scope {
                        scope = next;
                        drop(feed.take());
                        feed = self.bind(&scope).await;
                        retry = retry_at(scope.principal().is_some(), feed.as_ref());
                    }
                }
                item = next_item(&mut feed) => match item {
                    Some(FeedItem::Change(event)) => {
                        if let Some(principal) = scope.principal() {
                            update(&self.state, |snap| snap.rides.apply(event, principal));
                        }
                    }
                    Some(FeedItem::Gap { missed }) => {
                        warn!(missed, "Ride feed gap, re-fetching");
                        if let Some(principal) = scope.principal() {
                            self.refetch(principal).await;
                        }
                    }
                    None => {
                        warn!("Ride feed closed, resubscribing");
                        feed = None;
                        retry = retry_at(scope.principal().is_some(), feed.as_ref());
                    }
                },
                () = sleep_until(retry) => {
                    if let Some(principal) = scope.principal() {
                        feed = self.subscribe(principal).await;
                        if feed.is_some() {
                            self.refetch(principal).await;
                        }
                    }
                    retry = retry_at(scope.principal().is_some(), feed.as_ref());
                }
                () = tick(&mut timer) => {
                    if let Some(principal) = scope.principal() {
                        debug!("Periodic ride re-fetch");
                        self.refetch(principal).await;
                    }
                }
            }
        }
        debug!("Ride reconciler stopped");
    }

    /// Reset the cache for a new identity and, when signed in, subscribe
    /// then fetch.
    async fn bind(&self, identity: &IdentityState) -> Option<Subscription<RideRequest>> {
        let principal = identity.principal().cloned();
        update(&self.state, |snap| {
            snap.rides.clear();
            snap.loading = !matches!(identity, IdentityState::SignedOut);
            snap.principal.clone_from(&principal);
            snap.last_error = None;
            true
        });
        let principal = principal?;
        let feed = self.subscribe(&principal).await;
        self.refetch(&principal).await;
        feed
    }

    async fn subscribe(&self, principal: &Principal) -> Option<Subscription<RideRequest>> {
        match bounded(
            self.timeout,
            Operation::LoadRides,
            self.store.subscribe_rides(principal, ChangeKinds::ALL),
        )
        .await
        {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!(error = %e, "Ride feed subscription failed");
                None
            }
        }
    }

    async fn refetch(&self, principal: &Principal) {
        let filter = if principal.sees_all_rides() {
            RideFilter::all()
        } else {
            RideFilter::for_rider(&principal.id)
        };
        let fetched = bounded(
            self.timeout,
            Operation::LoadRides,
            self.store.select_rides(principal, &filter),
        )
        .await;

        update(&self.state, |snap| {
            snap.loading = false;
            match fetched {
                Ok(rows) => {
                    debug!(count = rows.len(), "Rides fetched");
                    snap.rides.replace_all(rows, principal);
                    snap.last_error = None;
                }
                Err(e) => {
                    warn!(error = %e, "Ride fetch failed");
                    snap.last_error = Some(e);
                }
            }
            true
        });
    }
}

async fn next_item(feed: &mut Option<Subscription<RideRequest>>) -> Option<FeedItem<RideRequest>> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration as Span, Utc};
    use ridesync_core::identity::Role;
    use ridesync_core::model::RideStatus;

    use super::*;

    fn ride(id: &str, rider: &str, age_mins: i64) -> RideRequest {
        let at = Utc::now() - Span::minutes(age_mins);
        RideRequest {
            id: id.into(),
            rider_id: rider.into(),
            driver_id: None,
            pickup_location: "A".into(),
            destination: "B".into(),
            passenger_count: 1,
            status: RideStatus::Requested,
            created_at: at,
            accepted_at: None,
            completed_at: None,
            updated_at: at,
        }
    }

    fn ids(cache: &RideCache) -> Vec<&str> {
        cache.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn fetch_is_sorted_newest_first_and_scoped() {
        let rider = Principal::new("r1", [Role::Rider]);
        let mut cache = RideCache::default();
        cache.replace_all(
            vec![ride("old", "r1", 30), ride("other", "r2", 10), ride("new", "r1", 1)],
            &rider,
        );
        assert_eq!(ids(&cache), ["new", "old"]);
    }

    #[test]
    fn insert_outside_scope_is_ignored() {
        let rider = Principal::new("r1", [Role::Rider]);
        let mut cache = RideCache::default();
        assert!(!cache.apply(ChangeEvent::Insert(ride("x", "r2", 0)), &rider));
        assert!(cache.is_empty());
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let driver = Principal::new("d", [Role::Driver]);
        let mut cache = RideCache::default();
        assert!(cache.apply(ChangeEvent::Insert(ride("x", "r", 0)), &driver));
        assert!(!cache.apply(ChangeEvent::Insert(ride("x", "r", 0)), &driver));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_preserves_position_and_is_idempotent() {
        let driver = Principal::new("d", [Role::Driver]);
        let mut cache = RideCache::default();
        cache.replace_all(vec![ride("a", "r", 1), ride("b", "r", 2), ride("c", "r", 3)], &driver);

        let mut changed = cache.get(&"b".into()).unwrap().clone();
        changed.status = RideStatus::Cancelled;
        assert!(cache.apply(ChangeEvent::Update(changed.clone()), &driver));
        let once = cache.clone();
        assert!(!cache.apply(ChangeEvent::Update(changed), &driver));

        assert_eq!(cache, once);
        assert_eq!(ids(&cache), ["a", "b", "c"]);
        assert_eq!(cache.get(&"b".into()).unwrap().status, RideStatus::Cancelled);
    }

    #[test]
    fn update_for_unknown_row_is_ignored() {
        let driver = Principal::new("d", [Role::Driver]);
        let mut cache = RideCache::default();
        assert!(!cache.apply(ChangeEvent::Update(ride("x", "r", 0)), &driver));
        assert!(cache.is_empty());
    }

    #[test]
    fn delete_removes_by_id() {
        let driver = Principal::new("d", [Role::Driver]);
        let mut cache = RideCache::default();
        cache.replace_all(vec![ride("a", "r", 1), ride("b", "r", 2)], &driver);
        assert!(cache.apply(ChangeEvent::Delete("a".into()), &driver));
        assert!(!cache.apply(ChangeEvent::Delete("a".into()), &driver));
        assert_eq!(ids(&cache), ["b"]);
    }

    #[test]
    fn upsert_prepends_new_rows() {
        let mut cache = RideCache::default();
        assert!(cache.upsert(ride("a", "r", 5)));
        assert!(cache.upsert(ride("b", "r", 0)));
        assert!(!cache.upsert(cache.get(&"a".into()).unwrap().clone()));
        assert_eq!(ids(&cache), ["b", "a"]);
    }

    #[test]
    fn upsert_keeps_newer_cached_row() {
        let driver = Principal::new("d", [Role::Driver]);
        let requested = ride("x", "r", 1);
        let mut accepted = requested.clone();
        accepted.status = RideStatus::Accepted;
        accepted.driver_id = Some("d".into());
        accepted.updated_at = requested.updated_at + Span::seconds(1);

        let mut cache = RideCache::default();
        assert!(cache.apply(ChangeEvent::Insert(requested.clone()), &driver));
        assert!(cache.apply(ChangeEvent::Update(accepted.clone()), &driver));
        assert!(!cache.upsert(requested));
        assert_eq!(cache.get(&"x".into()), Some(&accepted));

        let mut cancelled = accepted;
        cancelled.status = RideStatus::Cancelled;
        cancelled.updated_at += Span::seconds(1);
        assert!(cache.upsert(cancelled));
        assert_eq!(cache.get(&"x".into()).unwrap().status, RideStatus::Cancelled);
    }

    #[test]
    fn pending_counts_nest() {
        let (state, _) = watch::channel(RideSnapshot::default());
        let state = Arc::new(state);
        let first = Pending::begin(&state, Operation::AcceptRide);
        let second = Pending::begin(&state, Operation::AcceptRide);
        drop(first);
        assert!(state.borrow().is_pending(Operation::AcceptRide));
        drop(second);
        assert!(!state.borrow().is_pending(Operation::AcceptRide));
        assert!(!state.borrow().is_pending(Operation::StartRide));
    }
}
