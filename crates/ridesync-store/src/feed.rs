//! Change hub fanning committed row changes out to subscribers.
//!
//! Each table has one broadcast channel. Every subscriber gets its own
//! forwarding task that applies the read policy and the requested event
//! kinds before handing items to the subscriber's queue. A subscriber that
//! falls behind the broadcast buffer receives a [`FeedItem::Gap`] carrying
//! the number of dropped events.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ridesync_core::feed::{ChangeEvent, ChangeKinds, FeedItem, Keyed, Subscription};
use ridesync_core::identity::Principal;
use ridesync_core::model::{ActivityLogEntry, RideRequest};

/// Live subscriber counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedStats {
    pub ride_subscribers: usize,
    pub activity_subscribers: usize,
}

/// Per-table broadcast channels and subscriber bookkeeping.
pub struct ChangeHub {
    rides: broadcast::Sender<ChangeEvent<RideRequest>>,
    activity: broadcast::Sender<ChangeEvent<ActivityLogEntry>>,
    ride_subscribers: Arc<AtomicUsize>,
    activity_subscribers: Arc<AtomicUsize>,
    capacity: usize,
}

impl ChangeHub {
    /// Create a hub buffering `capacity` events per table.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (rides, _) = broadcast::channel(capacity);
        let (activity, _) = broadcast::channel(capacity);
        Self {
            rides,
            activity,
            ride_subscribers: Arc::new(AtomicUsize::new(0)),
            activity_subscribers: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Publish committed ride changes in commit order.
    pub fn publish_rides(&self, events: impl IntoIterator<Item = ChangeEvent<RideRequest>>) {
        for event in events {
            if let Ok(count) = self.rides.send(event) {
                debug!(receivers = count, "Ride change broadcast");
            }
        }
    }

    /// Publish committed activity-log inserts in commit order.
    pub fn publish_activity(
        &self,
        events: impl IntoIterator<Item = ChangeEvent<ActivityLogEntry>>,
    ) {
        for event in events {
            if let Ok(count) = self.activity.send(event) {
                debug!(receivers = count, "Activity change broadcast");
            }
        }
    }

    /// Subscribe `actor` to ride changes of the given kinds.
    ///
    /// Inserts and updates are delivered only for rows the actor may read.
    /// Deletes carry no row, so they go to every subscriber; a delete for a
    /// key the subscriber never held is a no-op on its side.
    pub fn subscribe_rides(&self, actor: Principal, kinds: ChangeKinds) -> Subscription<RideRequest> {
        let rx = self.rides.subscribe();
        spawn_forwarder(
            "ride_requests",
            rx,
            self.capacity,
            Arc::clone(&self.ride_subscribers),
            move |event| {
                kinds.contains(event.kind())
                    && event.row().is_none_or(|ride| actor.can_see_ride(ride))
            },
        )
    }

    /// Subscribe to activity-log inserts. Callers check the read policy.
    pub fn subscribe_activity(&self) -> Subscription<ActivityLogEntry> {
        let rx = self.activity.subscribe();
        spawn_forwarder(
            "activity_log",
            rx,
            self.capacity,
            Arc::clone(&self.activity_subscribers),
            |event| matches!(event, ChangeEvent::Insert(_)),
        )
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            ride_subscribers: self.ride_subscribers.load(Ordering::Relaxed),
            activity_subscribers: self.activity_subscribers.load(Ordering::Relaxed),
        }
    }
}

/// Decrements a subscriber count when the forwarder exits.
struct Registered(Arc<AtomicUsize>);

impl Registered {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for Registered {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn spawn_forwarder<T, F>(
    name: &'static str,
    mut rx: broadcast::Receiver<ChangeEvent<T>>,
    capacity: usize,
    counter: Arc<AtomicUsize>,
    wanted: F,
) -> Subscription<T>
where
    T: Keyed + Clone + Send + 'static,
    F: Fn(&ChangeEvent<T>) -> bool + Send + 'static,
{
    let (tx, out) = mpsc::channel(capacity);
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let registered = Registered::new(counter);

    tokio::spawn(async move {
        let _registered = registered;
        debug!(feed = name, "Subscriber attached");
        loop {
            let item = tokio::select! {
                () = cancelled.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) if wanted(&event) => FeedItem::Change(event),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(feed = name, missed, "Subscriber lagged, signalling gap");
                        FeedItem::Gap { missed }
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            tokio::select! {
                () = cancelled.cancelled() => break,
                sent = tx.send(item) => if sent.is_err() { break },
            }
        }
        debug!(feed = name, "Subscriber detached");
    });

    Subscription::new(name, out, token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use ridesync_core::db::now_millis;
    use ridesync_core::identity::Role;
    use ridesync_core::model::{ActionType, RideId, RideStatus};

    use super::*;

    fn ride(id: &str, rider: &str) -> RideRequest {
        let now = now_millis();
        RideRequest {
            id: id.into(),
            rider_id: rider.into(),
            driver_id: None,
            pickup_location: "A".into(),
            destination: "B".into(),
            passenger_count: 1,
            status: RideStatus::Requested,
            created_at: now,
            accepted_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn rider_receives_only_own_rows() {
        let hub = ChangeHub::new(16);
        let mut sub = hub.subscribe_rides(Principal::new("r1", [Role::Rider]), ChangeKinds::ALL);

        hub.publish_rides([
            ChangeEvent::Insert(ride("x", "r2")),
            ChangeEvent::Insert(ride("y", "r1")),
        ]);

        let item = sub.recv().await.unwrap();
        assert!(matches!(item, FeedItem::Change(ChangeEvent::Insert(r)) if r.id.as_str() == "y"));
        settle().await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn kinds_are_filtered() {
        let hub = ChangeHub::new(16);
        let mut sub =
            hub.subscribe_rides(Principal::new("d", [Role::Driver]), ChangeKinds::INSERT_ONLY);

        hub.publish_rides([
            ChangeEvent::Update(ride("x", "r")),
            ChangeEvent::Delete(RideId::from("x")),
            ChangeEvent::Insert(ride("y", "r")),
        ]);

        let item = sub.recv().await.unwrap();
        assert!(matches!(item, FeedItem::Change(ChangeEvent::Insert(_))));
        settle().await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn deletes_reach_every_subscriber() {
        let hub = ChangeHub::new(16);
        let mut sub = hub.subscribe_rides(Principal::new("r1", [Role::Rider]), ChangeKinds::ALL);

        hub.publish_rides([ChangeEvent::Delete(RideId::from("gone"))]);
        assert_eq!(
            sub.recv().await.unwrap(),
            FeedItem::Change(ChangeEvent::Delete(RideId::from("gone")))
        );
    }

    #[tokio::test]
    async fn slow_subscriber_sees_gap() {
        let hub = ChangeHub::new(2);
        let mut sub = hub.subscribe_rides(Principal::new("d", [Role::Driver]), ChangeKinds::ALL);
        // The forwarder has not polled yet, so the broadcast buffer overflows.
        for i in 0..12 {
            hub.publish_rides([ChangeEvent::Insert(ride(&format!("r{i}"), "r"))]);
        }

        let mut saw_gap = false;
        while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await {
            if let FeedItem::Gap { missed } = item {
                assert!(missed > 0);
                saw_gap = true;
            }
        }
        assert!(saw_gap);
    }

    #[tokio::test]
    async fn stats_track_live_subscribers() {
        let hub = ChangeHub::new(4);
        let rides = hub.subscribe_rides(Principal::new("d", [Role::Driver]), ChangeKinds::ALL);
        let activity = hub.subscribe_activity();
        assert_eq!(
            hub.stats(),
            FeedStats {
                ride_subscribers: 1,
                activity_subscribers: 1
            }
        );

        rides.unsubscribe();
        drop(activity);
        settle().await;
        assert_eq!(hub.stats(), FeedStats::default());
    }

    #[tokio::test]
    async fn activity_feed_carries_inserts() {
        let hub = ChangeHub::new(4);
        let mut sub = hub.subscribe_activity();
        let entry = ActivityLogEntry {
            id: 1,
            ride_id: "x".into(),
            action_type: ActionType::RideRequested,
            action_description: "Ride requested".into(),
            created_at: now_millis(),
        };

        hub.publish_activity([ChangeEvent::Delete(9), ChangeEvent::Insert(entry.clone())]);
        assert_eq!(sub.recv().await.unwrap(), FeedItem::Change(ChangeEvent::Insert(entry)));
    }
}
