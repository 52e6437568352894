// MIT License - Copyright (c) 2026 Peter Wright
// Per-category snapshot cache

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

use crate::category::{Category, ChannelId};
use crate::connector::{Capabilities, PanelConnector};
use crate::event::{StatusRouter, StatusUpdate};

/// The full set of active channels in one category at one instant.
///
/// A channel is active when its value is non-zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    channels: BTreeMap<ChannelId, u32>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot where each listed channel is active.
    pub fn from_active<I: IntoIterator<Item = ChannelId>>(channels: I) -> Self {
        Self {
            channels: channels.into_iter().map(|c| (c, 1)).collect(),
        }
    }

    /// Build a snapshot from raw channel numbers as reported by a connector.
    /// Channel 0 is not addressable and is skipped.
    pub fn from_raw<I: IntoIterator<Item = u32>>(channels: I) -> Self {
        Self::from_active(channels.into_iter().filter_map(ChannelId::new))
    }

    pub fn value(&self, channel: ChannelId) -> u32 {
        self.channels.get(&channel).copied().unwrap_or(0)
    }

    pub fn is_active(&self, channel: ChannelId) -> bool {
        self.value(channel) != 0
    }

    pub fn active(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[derive(Clone)]
struct Stamped {
    seq: u64,
    snapshot: Arc<Snapshot>,
}

struct Slot {
    current: watch::Sender<Stamped>,
    // serialises replace-then-publish for one category
    update_lock: Mutex<()>,
}

impl Slot {
    fn new() -> Self {
        let (current, _) = watch::channel(Stamped {
            seq: 0,
            snapshot: Arc::new(Snapshot::empty()),
        });
        Self {
            current,
            update_lock: Mutex::new(()),
        }
    }
}

/// Last-known snapshot per category.
///
/// Pushes enter through [`update`](Self::update), which replaces the slot and
/// broadcasts the new snapshot. Observers bootstrap through
/// [`refresh`](Self::refresh) before the live stream reaches them.
pub struct SnapshotStore {
    connector: Arc<dyn PanelConnector>,
    capabilities: Capabilities,
    router: Arc<StatusRouter>,
    slots: [Slot; 11],
    bootstrap_timeout: Duration,
}

impl SnapshotStore {
    pub fn new(
        connector: Arc<dyn PanelConnector>,
        capabilities: Capabilities,
        router: Arc<StatusRouter>,
        bootstrap_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            capabilities,
            router,
            slots: Category::ALL.map(|_| Slot::new()),
            bootstrap_timeout,
        }
    }

    fn slot(&self, category: Category) -> &Slot {
        &self.slots[category as usize]
    }

    /// Ask the panel for a fresh snapshot and wait briefly for it.
    ///
    /// The read is fire-and-forget; its answer arrives through the push path.
    /// Returns as soon as a new snapshot is applied, or after the bootstrap
    /// timeout with whatever is cached. Read failures are logged, not returned.
    pub async fn refresh(&self, category: Category) -> Arc<Snapshot> {
        let mut rx = self.slot(category).current.subscribe();

        if !self.capabilities.reads.has(category) {
            debug!("Connector cannot read {} status, using cached snapshot", category);
            return rx.borrow().snapshot.clone();
        }

        if let Err(e) = self.connector.request_read(category).await {
            warn!("Failed to request {} status: {}", category, e);
            return rx.borrow().snapshot.clone();
        }

        match timeout(self.bootstrap_timeout, rx.changed()).await {
            Ok(Ok(())) => trace!("{} snapshot arrived during bootstrap", category),
            Ok(Err(_)) => debug!("{} slot closed during bootstrap", category),
            Err(_) => debug!(
                "No {} snapshot within {:?}, continuing with cached state",
                category, self.bootstrap_timeout
            ),
        }
        rx.borrow().snapshot.clone()
    }

    /// Replace the snapshot for `category` and broadcast it.
    ///
    /// Returns the number of subscribers the update was delivered to.
    pub async fn update(&self, category: Category, snapshot: Snapshot) -> usize {
        let slot = self.slot(category);
        let _guard = slot.update_lock.lock().await;

        let snapshot = Arc::new(snapshot);
        let seq = slot.current.borrow().seq + 1;
        slot.current.send_replace(Stamped {
            seq,
            snapshot: snapshot.clone(),
        });
        let delivered = self.router.publish(category, StatusUpdate { category, seq, snapshot });
        trace!("{} snapshot delivered to {} observers", category, delivered);
        delivered
    }

    /// The cached snapshot; empty if the category was never populated.
    pub fn current(&self, category: Category) -> Arc<Snapshot> {
        self.slot(category).current.borrow().snapshot.clone()
    }

    /// The cached snapshot together with its sequence number.
    pub fn latest(&self, category: Category) -> StatusUpdate {
        let current = self.slot(category).current.borrow().clone();
        StatusUpdate {
            category,
            seq: current.seq,
            snapshot: current.snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::memory::MemoryConnector;

    fn ch(n: u32) -> ChannelId {
        ChannelId::new(n).unwrap()
    }

    fn store_with(connector: Arc<MemoryConnector>, millis: u64) -> (Arc<SnapshotStore>, Arc<StatusRouter>) {
        let router = Arc::new(StatusRouter::new());
        let caps = connector.capabilities_value();
        let store = Arc::new(SnapshotStore::new(
            connector,
            caps,
            router.clone(),
            Duration::from_millis(millis),
        ));
        (store, router)
    }

    #[test]
    fn test_snapshot_membership() {
        let snap = Snapshot::from_raw([1, 0, 5]);
        assert_eq!(snap.len(), 2);
        assert!(snap.is_active(ch(1)));
        assert!(snap.is_active(ch(5)));
        assert!(!snap.is_active(ch(2)));
        assert_eq!(snap.active().map(|c| c.get()).collect::<Vec<_>>(), vec![1, 5]);
    }

    #[tokio::test]
    async fn test_update_sequence_numbers() {
        let (store, router) = store_with(Arc::new(MemoryConnector::new()), 10);
        assert_eq!(store.latest(Category::Alarm).seq, 0);

        let mut feed = router.subscribe(Category::Alarm).unwrap();
        store.update(Category::Alarm, Snapshot::from_raw([1])).await;
        store.update(Category::Alarm, Snapshot::from_raw([1])).await;
        store.update(Category::Tamper, Snapshot::from_raw([1])).await;

        assert_eq!(feed.recv().await.unwrap().seq, 1);
        assert_eq!(feed.recv().await.unwrap().seq, 2);
        let latest = store.latest(Category::Alarm);
        assert_eq!(latest.seq, 2);
        assert!(latest.snapshot.is_active(ch(1)));
        // each category counts on its own
        assert_eq!(store.latest(Category::Tamper).seq, 1);
    }

    #[tokio::test]
    async fn test_current_defaults_to_empty() {
        let (store, _router) = store_with(Arc::new(MemoryConnector::new()), 10);
        for category in Category::ALL {
            assert!(store.current(category).is_empty());
        }
    }

    #[tokio::test]
    async fn test_update_is_category_scoped() {
        let (store, router) = store_with(Arc::new(MemoryConnector::new()), 10);
        let mut trouble = router.subscribe(Category::Trouble).unwrap();
        let mut violation = router.subscribe(Category::Violation).unwrap();

        assert_eq!(store.update(Category::Violation, Snapshot::from_raw([3])).await, 1);

        assert!(store.current(Category::Violation).is_active(ch(3)));
        assert!(store.current(Category::Trouble).is_empty());
        assert!(trouble.try_recv().is_none());
        let update = violation.recv().await.unwrap();
        assert_eq!(update.category, Category::Violation);
        assert!(update.snapshot.is_active(ch(3)));
    }

    #[tokio::test]
    async fn test_update_replaces_wholesale() {
        let (store, _router) = store_with(Arc::new(MemoryConnector::new()), 10);
        store.update(Category::Alarm, Snapshot::from_raw([1, 2])).await;
        let before = store.current(Category::Alarm);
        store.update(Category::Alarm, Snapshot::from_raw([2])).await;

        // earlier readers keep their own consistent copy
        assert_eq!(before.len(), 2);
        let after = store.current(Category::Alarm);
        assert!(!after.is_active(ch(1)));
        assert!(after.is_active(ch(2)));
    }

    #[tokio::test]
    async fn test_refresh_returns_early_when_push_arrives() {
        let connector = Arc::new(MemoryConnector::new());
        let mut reads = connector.read_requests();
        let (store, _router) = store_with(connector.clone(), 5_000);

        let responder = store.clone();
        tokio::spawn(async move {
            while let Some(category) = reads.recv().await {
                responder.update(category, Snapshot::from_raw([4])).await;
            }
        });

        let started = tokio::time::Instant::now();
        let snap = store.refresh(Category::Tamper).await;
        assert!(snap.is_active(ch(4)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(connector.reads(), vec![Category::Tamper]);
    }

    #[tokio::test]
    async fn test_refresh_times_out_with_cached_state() {
        let connector = Arc::new(MemoryConnector::new());
        let (store, _router) = store_with(connector.clone(), 20);
        store.update(Category::Bypass, Snapshot::from_raw([9])).await;

        let snap = store.refresh(Category::Bypass).await;
        assert!(snap.is_active(ch(9)));
        assert_eq!(connector.reads(), vec![Category::Bypass]);
    }

    #[tokio::test]
    async fn test_refresh_survives_read_failure() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_fail_reads(true);
        let (store, _router) = store_with(connector.clone(), 5_000);

        let started = tokio::time::Instant::now();
        let snap = store.refresh(Category::Violation).await;
        assert!(snap.is_empty());
        // a failed request does not wait out the bootstrap timeout
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_refresh_skips_unreadable_category() {
        let connector = Arc::new(MemoryConnector::with_capabilities(Capabilities {
            reads: Category::Violation.flag(),
            pushes: crate::category::CategorySet::all(),
        }));
        let (store, _router) = store_with(connector.clone(), 5_000);

        let snap = store.refresh(Category::Trouble2).await;
        assert!(snap.is_empty());
        assert!(connector.reads().is_empty());
    }
}
