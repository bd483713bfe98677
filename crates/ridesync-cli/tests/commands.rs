//! Command implementations against in-memory and file-backed stores.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use ridesync_cli::activity_cmd;
use ridesync_cli::ride_cmd::{self, ListView};
use ridesync_cli::role_cmd;
use ridesync_cli::session::Session;
use ridesync_core::config::Config;
use ridesync_core::{Principal, RideFilter, RideRequest, RideStatus, RideTransition, Role};
use ridesync_store::SqliteStore;

fn config() -> Config {
    let mut config = Config::default();
    config.sync.resync_interval_secs = 0;
    config
}

async fn session(store: &Arc<SqliteStore>, user: Option<&str>) -> Session {
    Session::with_store(config(), Arc::clone(store), user).await.unwrap()
}

async fn rides_of(store: &SqliteStore, rider: &str) -> Vec<RideRequest> {
    store
        .database()
        .select_rides(&Principal::new(rider, [Role::Rider]), &RideFilter::all())
        .await
        .unwrap()
}

#[tokio::test]
async fn ride_lifecycle_through_commands() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let admin = session(&store, None).await;
    role_cmd::grant(&admin, "alice", Role::Rider).await.unwrap();
    role_cmd::grant(&admin, "bob", Role::Driver).await.unwrap();
    role_cmd::show(&admin, "bob").await.unwrap();

    let alice = session(&store, Some("alice")).await;
    let bob = session(&store, Some("bob")).await;

    ride_cmd::request(&alice, "123 Main St", "456 Oak Ave", Some(2))
        .await
        .unwrap();
    let id = rides_of(&store, "alice").await[0].id.to_string();

    for step in [
        RideTransition::Accept,
        RideTransition::Start,
        RideTransition::Complete,
    ] {
        ride_cmd::transition(&bob, step, &id).await.unwrap();
    }

    let ride = &rides_of(&store, "alice").await[0];
    assert_eq!(ride.status, RideStatus::Completed);
    assert_eq!(ride.driver_id.as_ref().map(ToString::to_string).as_deref(), Some("bob"));
    ride_cmd::list(&alice, ListView::History).await.unwrap();
    ride_cmd::list(&bob, ListView::Mine).await.unwrap();
}

#[tokio::test]
async fn failures_carry_the_toast_text() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store.database().grant_role(&"alice".into(), Role::Rider).await.unwrap();

    let nobody = session(&store, None).await;
    let err = ride_cmd::request(&nobody, "A", "B", None).await.unwrap_err();
    assert_eq!(err.to_string(), "Please sign in");
    assert_eq!(
        ride_cmd::list(&nobody, ListView::All).await.unwrap_err().to_string(),
        "Please sign in"
    );

    let alice = session(&store, Some("alice")).await;
    let err = ride_cmd::request(&alice, "", "B", None).await.unwrap_err();
    assert_eq!(err.to_string(), "Pickup location is required");
    let err = ride_cmd::request(&alice, "A", "B", Some(0)).await.unwrap_err();
    assert!(err.to_string().starts_with("Passenger count must be at least 1"));

    let err = ride_cmd::transition(&alice, RideTransition::Accept, "nope")
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Failed to accept ride"), "{err}");

    let err = activity_cmd::recent(&alice, 10).await.unwrap_err();
    assert!(err.to_string().contains("only visible to employers and admins"));
    assert!(rides_of(&store, "alice").await.is_empty());
}

#[tokio::test]
async fn lost_accept_race_is_not_a_failure() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let db = store.database();
    db.grant_role(&"alice".into(), Role::Rider).await.unwrap();
    db.grant_role(&"d1".into(), Role::Driver).await.unwrap();
    db.grant_role(&"d2".into(), Role::Driver).await.unwrap();
    db.grant_role(&"boss".into(), Role::Employer).await.unwrap();

    let alice = session(&store, Some("alice")).await;
    ride_cmd::request(&alice, "A", "B", None).await.unwrap();
    let id = rides_of(&store, "alice").await[0].id.to_string();

    ride_cmd::transition(&session(&store, Some("d1")).await, RideTransition::Accept, &id)
        .await
        .unwrap();
    ride_cmd::transition(&session(&store, Some("d2")).await, RideTransition::Accept, &id)
        .await
        .unwrap();
    assert_eq!(
        rides_of(&store, "alice").await[0]
            .driver_id
            .as_ref()
            .map(ToString::to_string)
            .as_deref(),
        Some("d1")
    );

    activity_cmd::recent(&session(&store, Some("boss")).await, 10)
        .await
        .unwrap();
}

#[tokio::test]
async fn file_store_keeps_roles_between_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.store.database_path = Some(dir.path().join("nested").join("rides.db"));

    let first = Session::open(config.clone(), None).await.unwrap();
    role_cmd::grant(&first, "carol", Role::Admin).await.unwrap();
    drop(first);

    let second = Session::open(config, Some("carol")).await.unwrap();
    assert!(second.principal().unwrap().has_role(Role::Admin));
}
