//! Activity feed engine.
//!
//! Mirrors the newest entries of the activity log for principals allowed to
//! read it. Everyone else gets an inert feed: empty, not loading, and no
//! subscription held.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ridesync_core::config::{ActivityConfig, SyncConfig};
use ridesync_core::feed::{ChangeEvent, FeedItem, Subscription};
use ridesync_core::identity::Principal;
use ridesync_core::model::ActivityLogEntry;
use ridesync_core::store::RecordStore;

use crate::client::{bounded, retry_at, sleep_until};
use crate::error::{Operation, RideError};
use crate::identity::IdentityState;

/// Fixed-capacity window of the newest entries, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityWindow {
    entries: VecDeque<ActivityLogEntry>,
    capacity: usize,
}

impl ActivityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Replace the window with a newest-first fetch.
    pub fn replace_all(&mut self, entries: Vec<ActivityLogEntry>) {
        self.entries.clear();
        self.entries.extend(entries.into_iter().take(self.capacity));
    }

    /// Add an entry at the head, evicting the oldest when full. Entries
    /// already present are ignored.
    pub fn push_newest(&mut self, entry: ActivityLogEntry) -> bool {
        if self.entries.iter().any(|e| e.id == entry.id) {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Observable activity feed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub entries: ActivityWindow,
    pub loading: bool,
    /// False for principals the activity log is hidden from.
    pub enabled: bool,
    pub revision: u64,
    pub last_error: Option<RideError>,
}

type State = Arc<watch::Sender<ActivitySnapshot>>;

fn update(state: &State, f: impl FnOnce(&mut ActivitySnapshot) -> bool) {
    state.send_if_modified(|snap| {
        let changed = f(snap);
        if changed {
            snap.revision += 1;
        }
        changed
    });
}

/// Live, bounded mirror of the activity log.
pub struct ActivityFeed {
    fetcher: Fetcher,
    identity: watch::Receiver<IdentityState>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ActivityFeed {
    pub fn mount(
        store: Arc<dyn RecordStore>,
        identity: watch::Receiver<IdentityState>,
        sync: &SyncConfig,
        activity: &ActivityConfig,
    ) -> Self {
        let privileged = identity
            .borrow()
            .principal()
            .is_some_and(Principal::can_view_activity);
        let (state, _) = watch::channel(ActivitySnapshot {
            entries: ActivityWindow::new(activity.window),
            loading: privileged,
            enabled: privileged,
            revision: 0,
            last_error: None,
        });

        let fetcher = Fetcher {
            store,
            state: Arc::new(state),
            timeout: sync.operation_timeout(),
            limit: activity.window,
        };
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(fetcher.clone().run(
            identity.clone(),
            sync.resync_interval(),
            shutdown.clone(),
        ));

        Self {
            fetcher,
            identity,
            shutdown,
            task: Some(task),
        }
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        self.fetcher.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ActivitySnapshot> {
        self.fetcher.state.subscribe()
    }

    pub async fn loaded(&self) -> ActivitySnapshot {
        let mut rx = self.fetcher.state.subscribe();
        match rx.wait_for(|snap| !snap.loading).await {
            Ok(snap) => snap.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Re-read the newest `limit` entries (the window size when `None`)
    /// into the window. Empty for principals without access.
    ///
    /// A limit above the window size returns every fetched entry but only
    /// the newest ones stay in the window.
    pub async fn fetch_recent(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityLogEntry>, RideError> {
        let principal = self
            .identity
            .borrow()
            .principal()
            .cloned()
            .ok_or(RideError::Authentication)?;
        if !principal.can_view_activity() {
            return Ok(Vec::new());
        }
        let limit = limit.unwrap_or(self.fetcher.limit);
        self.fetcher.fetch(&principal, limit).await
    }

    pub async fn unmount(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Activity reconciler ended abnormally");
        }
        debug!("Activity feed unmounted");
    }
}

impl Drop for ActivityFeed {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Clone)]
struct Fetcher {
    store: Arc<dyn RecordStore>,
    state: State,
    timeout: Duration,
    limit: usize,
}

impl Fetcher {
    async fn run(
        self,
        mut identity: watch::Receiver<IdentityState>,
        resync: Option<Duration>,
        shutdown: CancellationToken,
    ) {
        let mut scope = identity.borrow_and_update().clone();
        let mut feed = self.bind(&scope).await;
        let mut retry = retry_at(viewer(&scope).is_some(), feed.as_ref());
        let mut timer = resync.map(|period| {
            let mut timer = tokio::time::interval(period);
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
                        retry = retry_at(viewer(&scope).is_some(), feed.as_ref());
                    }
                }
                item = next_item(&mut feed) => match item {
                    Some(FeedItem::Change(ChangeEvent::Insert(entry))) => {
                        update(&self.state, |snap| snap.entries.push_newest(entry));
                    }
                    Some(FeedItem::Change(_)) => {}
                    Some(FeedItem::Gap { missed }) => {
                        warn!(missed, "Activity feed gap, re-fetching");
                        self.refetch(&scope).await;
                    }
                    None => {
                        warn!("Activity feed closed, resubscribing");
                        feed = None;
                        retry = retry_at(viewer(&scope).is_some(), feed.as_ref());
                    }
                },
                () = sleep_until(retry) => {
                    if let Some(principal) = viewer(&scope) {
                        feed = self.subscribe(principal).await;
                        if feed.is_some() {
                            self.refetch(&scope).await;
                        }
                    }
                    retry = retry_at(viewer(&scope).is_some(), feed.as_ref());
                }
                () = tick(&mut timer) => self.refetch(&scope).await,
            }
        }
        debug!("Activity reconciler stopped");
    }

    async fn bind(&self, identity: &IdentityState) -> Option<Subscription<ActivityLogEntry>> {
        let principal = viewer(identity).cloned();
        update(&self.state, |snap| {
            snap.entries.clear();
            snap.enabled = principal.is_some();
            snap.loading = principal.is_some() || matches!(identity, IdentityState::Resolving);
            snap.last_error = None;
            true
        });
        let principal = principal?;
        let feed = self.subscribe(&principal).await;
        if let Err(e) = self.fetch(&principal, self.limit).await {
            warn!(error = %e, "Activity fetch failed");
        }
        feed
    }

    async fn subscribe(&self, principal: &Principal) -> Option<Subscription<ActivityLogEntry>> {
        match bounded(
            self.timeout,
            Operation::LoadActivity,
            self.store.subscribe_activity(principal),
        )
        .await
        {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!(error = %e, "Activity feed subscription failed");
                None
            }
        }
    }

    async fn refetch(&self, scope: &IdentityState) {
        if let Some(principal) = viewer(scope)
            && let Err(e) = self.fetch(principal, self.limit).await
        {
            warn!(error = %e, "Activity re-fetch failed");
        }
    }

    /// Fetch the newest `limit` entries and replace the window with them.
    async fn fetch(
        &self,
        principal: &Principal,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, RideError> {
        let fetched = bounded(
            self.timeout,
            Operation::LoadActivity,
            self.store.select_activity(principal, limit),
        )
        .await;

        update(&self.state, |snap| {
            snap.loading = false;
            match &fetched {
                Ok(entries) => {
                    snap.entries.replace_all(entries.clone());
                    snap.last_error = None;
                }
                Err(e) => snap.last_error = Some(e.clone()),
            }
            true
        });
        fetched
    }
}

/// The signed-in principal, if it may read the activity log.
fn viewer(scope: &IdentityState) -> Option<&Principal> {
    scope.principal().filter(|p| p.can_view_activity())
}

async fn next_item(
    feed: &mut Option<Subscription<ActivityLogEntry>>,
) -> Option<FeedItem<ActivityLogEntry>> {
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
