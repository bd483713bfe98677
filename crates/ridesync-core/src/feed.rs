//! Change-feed events and the scoped subscription handle.

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::model::{ActivityLogEntry, RideId, RideRequest};

/// A row that can be addressed by key in a change event.
pub trait Keyed {
    type Key: Clone + Eq + std::fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

impl Keyed for RideRequest {
    type Key = RideId;

    fn key(&self) -> RideId {
        self.id.clone()
    }
}

impl Keyed for ActivityLogEntry {
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }
}

/// Row-level change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent<T: Keyed> {
    Insert(T),
    Update(T),
    Delete(T::Key),
}

impl<T: Keyed> ChangeEvent<T> {
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update(_) => ChangeKind::Update,
            Self::Delete(_) => ChangeKind::Delete,
        }
    }

    /// The row carried by insert and update events.
    pub const fn row(&self) -> Option<&T> {
        match self {
            Self::Insert(row) | Self::Update(row) => Some(row),
            Self::Delete(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which event kinds a subscriber wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeKinds {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl ChangeKinds {
    pub const ALL: Self = Self {
        insert: true,
        update: true,
        delete: true,
    };

    pub const INSERT_ONLY: Self = Self {
        insert: true,
        update: false,
        delete: false,
    };

    pub const fn contains(self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Insert => self.insert,
            ChangeKind::Update => self.update,
            ChangeKind::Delete => self.delete,
        }
    }
}

/// Item delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem<T: Keyed> {
    Change(ChangeEvent<T>),
    /// The transport dropped `missed` events; the subscriber must re-fetch.
    Gap { missed: u64 },
}

/// Scoped handle to a live change feed.
///
/// The producer side stops as soon as the handle is dropped or
/// [`Subscription::unsubscribe`] is called.
pub struct Subscription<T: Keyed> {
    name: &'static str,
    rx: mpsc::Receiver<FeedItem<T>>,
    /// Held by inert feeds so `recv` pends instead of closing.
    _idle_tx: Option<mpsc::Sender<FeedItem<T>>>,
    _guard: DropGuard,
}

impl<T: Keyed> Subscription<T> {
    /// Wrap a receiver whose producer watches `token` for teardown.
    pub fn new(
        name: &'static str,
        rx: mpsc::Receiver<FeedItem<T>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            name,
            rx,
            _idle_tx: None,
            _guard: token.drop_guard(),
        }
    }

    /// A subscription that never yields, for principals the table is
    /// hidden from.
    pub fn inert(name: &'static str) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            name,
            rx,
            _idle_tx: Some(tx),
            _guard: CancellationToken::new().drop_guard(),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Next item, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<FeedItem<T>> {
        self.rx.recv().await
    }

    /// Next item if one is already buffered.
    pub fn try_recv(&mut self) -> Option<FeedItem<T>> {
        self.rx.try_recv().ok()
    }

    /// Tear the feed down explicitly.
    pub fn unsubscribe(self) {
        debug!(feed = self.name, "Unsubscribed");
    }
}

impl<T: Keyed> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Row(u32);

    impl Keyed for Row {
        type Key = u32;

        fn key(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn kinds_filter() {
        assert!(ChangeKinds::ALL.contains(ChangeKind::Delete));
        assert!(ChangeKinds::INSERT_ONLY.contains(ChangeKind::Insert));
        assert!(!ChangeKinds::INSERT_ONLY.contains(ChangeKind::Update));
    }

    #[test]
    fn delete_carries_no_row() {
        let event: ChangeEvent<Row> = ChangeEvent::Delete(7);
        assert_eq!(event.kind(), ChangeKind::Delete);
        assert!(event.row().is_none());
        assert_eq!(ChangeEvent::Update(Row(3)).row(), Some(&Row(3)));
    }

    #[tokio::test]
    async fn dropping_subscription_cancels_producer() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<FeedItem<Row>>(4);
        let sub = Subscription::new("rows", rx, token.clone());

        tx.send(FeedItem::Change(ChangeEvent::Insert(Row(1))))
            .await
            .unwrap();
        assert!(!token.is_cancelled());
        drop(sub);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn inert_subscription_yields_nothing() {
        let mut sub = Subscription::<Row>::inert("rows");
        assert!(sub.try_recv().is_none());
        sub.unsubscribe();
    }
}
