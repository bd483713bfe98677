//! Activity feed and role dashboards against a real in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use ridesync_core::config::{ActivityConfig, Config, SyncConfig};
use ridesync_core::{ActionType, RecordStore, Role, RideStatus};
use ridesync_engine::{
    ActivityFeed, ActivitySnapshot, Dashboard, DashboardKind, IdentityContext, Notice, RideError,
};
use ridesync_store::{LocalAuth, SqliteRoleDirectory, SqliteStore};

struct World {
    store: Arc<SqliteStore>,
}

impl World {
    async fn new() -> Self {
        Self {
            store: Arc::new(SqliteStore::open_in_memory().await.unwrap()),
        }
    }

    fn dyn_store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    async fn identity(&self, id: &str, roles: &[Role]) -> IdentityContext {
        self.identity_for(Arc::new(LocalAuth::signed_in(id)), id, roles).await
    }

    async fn identity_for(&self, auth: Arc<LocalAuth>, id: &str, roles: &[Role]) -> IdentityContext {
        for role in roles {
            self.store.database().grant_role(&id.into(), *role).await.unwrap();
        }
        let directory = Arc::new(SqliteRoleDirectory::new(self.store.database().clone()));
        IdentityContext::start(auth, directory).await.unwrap()
    }

    async fn feed(&self, identity: &IdentityContext, window: usize) -> ActivityFeed {
        let feed = ActivityFeed::mount(
            self.dyn_store(),
            identity.subscribe(),
            &SyncConfig::default(),
            &ActivityConfig { window },
        );
        feed.loaded().await;
        feed
    }

    async fn dashboard(&self, identity: &IdentityContext) -> Dashboard {
        let dashboard = Dashboard::mount(&self.dyn_store(), identity, &Config::default()).unwrap();
        dashboard.loaded().await;
        dashboard
    }
}

async fn until(feed: &ActivityFeed, f: impl FnMut(&ActivitySnapshot) -> bool) -> ActivitySnapshot {
    let mut rx = feed.watch();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(f))
        .await
        .expect("feed did not reach the expected state")
        .unwrap()
        .clone()
}

fn descriptions(snapshot: &ActivitySnapshot) -> Vec<String> {
    snapshot
        .entries
        .iter()
        .map(|e| e.action_description.clone())
        .collect()
}

#[tokio::test]
async fn employer_sees_new_entries_at_the_head() {
    let world = World::new().await;
    let boss = world.identity("boss", &[Role::Employer]).await;
    let rider = world.dashboard(&world.identity("rider", &[Role::Rider]).await).await;
    let feed = world.feed(&boss, 50).await;
    assert!(feed.snapshot().enabled);
    assert!(feed.snapshot().entries.is_empty());

    rider.request("Depot", "Airport", Some(3)).await;
    let snap = until(&feed, |s| s.entries.len() == 1).await;
    assert_eq!(
        descriptions(&snap),
        ["Ride requested from Depot to Airport (3 passengers)"]
    );
    assert_eq!(
        snap.entries.iter().next().unwrap().action_type,
        ActionType::RideRequested
    );
}

#[tokio::test]
async fn window_keeps_only_the_newest_entries() {
    let world = World::new().await;
    let admin = world.identity("admin", &[Role::Admin]).await;
    let rider = world.dashboard(&world.identity("rider", &[Role::Rider]).await).await;
    let feed = world.feed(&admin, 3).await;

    for n in 1..=5 {
        rider.request(&format!("Stop {n}"), "Home", None).await;
    }
    let snap = until(&feed, |s| {
        s.entries
            .iter()
            .next()
            .is_some_and(|e| e.action_description.contains("Stop 5"))
    })
    .await;
    assert_eq!(snap.entries.len(), 3);
    let newest: Vec<_> = descriptions(&snap);
    assert!(newest[0].contains("Stop 5"));
    assert!(newest[2].contains("Stop 3"));

    let fetched = feed.fetch_recent(None).await.unwrap();
    assert_eq!(fetched.len(), 3);
    assert_eq!(fetched[0].action_description, newest[0]);

    let wider = feed.fetch_recent(Some(5)).await.unwrap();
    assert_eq!(wider.len(), 5);
    assert!(wider[4].action_description.contains("Stop 1"));
    assert_eq!(feed.snapshot().entries.len(), 3);

    let narrow = feed.fetch_recent(Some(1)).await.unwrap();
    assert_eq!(narrow.len(), 1);
    assert_eq!(narrow[0].action_description, newest[0]);
}

#[tokio::test]
async fn riders_get_an_inert_feed() {
    let world = World::new().await;
    let rider = world.identity("rider", &[Role::Rider]).await;
    let feed = world.feed(&rider, 50).await;

    let snap = feed.snapshot();
    assert!(!snap.enabled);
    assert!(!snap.loading);
    assert!(snap.entries.is_empty());
    assert!(feed.fetch_recent(None).await.unwrap().is_empty());
    assert_eq!(world.store.feed_stats().activity_subscribers, 0);
}

#[tokio::test]
async fn feed_follows_sign_in_and_sign_out() {
    let world = World::new().await;
    let auth = Arc::new(LocalAuth::default());
    let identity = world.identity_for(auth.clone(), "boss", &[Role::Employer]).await;
    let feed = world.feed(&identity, 50).await;
    assert!(!feed.snapshot().enabled);
    assert_eq!(
        feed.fetch_recent(None).await.unwrap_err(),
        RideError::Authentication
    );

    auth.sign_in("boss");
    until(&feed, |s| s.enabled && !s.loading).await;
    assert_eq!(world.store.feed_stats().activity_subscribers, 1);

    auth.sign_out();
    until(&feed, |s| !s.enabled).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while world.store.feed_stats().activity_subscribers > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn dashboard_kind_and_sections_follow_roles() {
    let world = World::new().await;
    let rider_id = world.identity("rider", &[Role::Rider]).await;
    let rider = world.dashboard(&rider_id).await;
    let driver = world.dashboard(&world.identity("driver", &[Role::Rider, Role::Driver]).await).await;
    let boss = world.dashboard(&world.identity("boss", &[Role::Employer]).await).await;

    assert_eq!(rider.kind(), DashboardKind::Rider);
    assert_eq!(driver.kind(), DashboardKind::Driver);
    assert_eq!(boss.kind(), DashboardKind::Employer);
    assert!(rider.activity().is_none());
    assert!(boss.activity().is_some());

    let mut boss_changes = boss.changes();
    let notice = rider.request("Depot", "Airport", None).await;
    assert!(matches!(notice, Notice::Success(_)), "{notice}");
    let changed = tokio::time::timeout(Duration::from_secs(2), boss_changes.next()).await;
    assert_eq!(changed, Ok(true));

    let mut rides = driver.rides().watch();
    tokio::time::timeout(
        Duration::from_secs(2),
        rides.wait_for(|s| !s.rides.available().is_empty()),
    )
    .await
    .unwrap()
    .unwrap();

    let view = driver.view();
    assert_eq!(view.sections[0].title, "Available rides");
    assert_eq!(view.counts.requested, 1);
    let rendered = view.to_string();
    assert!(rendered.starts_with("Driver dashboard (driver)"));
    assert!(rendered.contains("Depot -> Airport"));

    let view = rider.view();
    assert_eq!(view.sections[0].title, "My active rides");
    assert_eq!(view.sections[0].rides.len(), 1);
}

#[tokio::test]
async fn losing_an_accept_race_is_a_notice_not_an_error() {
    let world = World::new().await;
    let rider = world.dashboard(&world.identity("rider", &[Role::Rider]).await).await;
    let first = world.dashboard(&world.identity("d1", &[Role::Driver]).await).await;
    let second = world.dashboard(&world.identity("d2", &[Role::Driver]).await).await;

    rider.request("A", "B", None).await;
    let id = rider.rides().snapshot().rides.rows()[0].id.clone();

    assert_eq!(first.accept(&id).await, Notice::Success(format!("Ride {id} accepted")));
    assert_eq!(
        second.accept(&id).await,
        Notice::Info("Ride was already taken".to_string())
    );

    let notice = second.start(&id).await;
    assert!(notice.is_error());
    assert!(notice.message().starts_with("Failed to start ride"), "{notice}");

    assert_eq!(first.start(&id).await, Notice::Success(format!("Ride {id} started")));
    assert_eq!(first.complete(&id).await, Notice::Success(format!("Ride {id} completed")));
    let mut rides = first.rides().watch();
    tokio::time::timeout(
        Duration::from_secs(2),
        rides.wait_for(|s| s.rides.get(&id).is_some_and(|r| r.status == RideStatus::Completed)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(first.view().counts.completed, 1);
}

#[tokio::test]
async fn validation_failures_become_notices() {
    let world = World::new().await;
    let rider = world.dashboard(&world.identity("rider", &[Role::Rider]).await).await;

    assert_eq!(
        rider.request("  ", "Airport", None).await,
        Notice::Error("Pickup location is required".to_string())
    );
    assert!(rider.rides().snapshot().rides.is_empty());
}

#[tokio::test]
async fn dashboards_need_a_signed_in_principal_with_roles() {
    let world = World::new().await;
    let signed_out = world
        .identity_for(Arc::new(LocalAuth::default()), "nobody", &[])
        .await;
    assert!(matches!(
        Dashboard::mount(&world.dyn_store(), &signed_out, &Config::default()),
        Err(RideError::Authentication)
    ));

    let roleless = world.identity("ghost", &[]).await;
    assert!(matches!(
        Dashboard::mount(&world.dyn_store(), &roleless, &Config::default()),
        Err(RideError::Forbidden { .. })
    ));
}
