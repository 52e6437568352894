// MIT License - Copyright (c) 2026 Peter Wright
// Topic-keyed publish/subscribe

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{BridgeError, Result};

/// Fan-out of messages to subscribers, one topic per key.
///
/// Every subscriber owns an unbounded queue, so a slow subscriber never
/// causes an update to be dropped and never delays the others. A publish
/// delivers to the subscriber set as it was when the publish started.
pub struct NotificationRouter<K, M> {
    inner: Arc<RouterInner<K, M>>,
}

struct RouterInner<K, M> {
    topics: Mutex<HashMap<K, Vec<Subscriber<M>>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

struct Subscriber<M> {
    id: u64,
    tx: mpsc::UnboundedSender<M>,
}

impl<K, M> RouterInner<K, M>
where
    K: Copy + Eq + Hash,
{
    fn topics(&self) -> MutexGuard<'_, HashMap<K, Vec<Subscriber<M>>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: K, id: u64) {
        let mut topics = self.topics();
        if let Some(subs) = topics.get_mut(&topic) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                topics.remove(&topic);
            }
        }
    }
}

impl<K, M> NotificationRouter<K, M>
where
    K: Copy + Eq + Hash + fmt::Debug,
    M: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new feed for `topic`. Fails once the router is closed.
    pub fn subscribe(&self, topic: K) -> Result<Subscription<K, M>> {
        let mut topics = self.inner.topics();
        // checked under the lock so close() cannot race a registration
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::RouterClosed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        topics.entry(topic).or_default().push(Subscriber { id, tx });
        drop(topics);

        trace!("Subscriber {} registered on {:?}", id, topic);
        Ok(Subscription {
            topic,
            id,
            rx,
            router: Arc::downgrade(&self.inner),
        })
    }

    /// Deliver `message` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers the message was queued for.
    pub fn publish(&self, topic: K, message: M) -> usize {
        let targets: Vec<(u64, mpsc::UnboundedSender<M>)> = {
            let topics = self.inner.topics();
            match topics.get(&topic) {
                Some(subs) => subs.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in targets {
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                gone.push(id);
            }
        }

        for id in gone {
            debug!("Pruning closed subscriber {} on {:?}", id, topic);
            self.inner.remove(topic, id);
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: K) -> usize {
        self.inner.topics().get(&topic).map_or(0, Vec::len)
    }

    /// Stop accepting subscriptions and end all feeds.
    ///
    /// Messages already queued stay readable; `recv` returns `None` after them.
    pub fn close(&self) {
        let mut topics = self.inner.topics();
        self.inner.closed.store(true, Ordering::SeqCst);
        let count: usize = topics.values().map(Vec::len).sum();
        topics.clear();
        debug!("Notification router closed ({} feeds ended)", count);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl<K, M> Default for NotificationRouter<K, M>
where
    K: Copy + Eq + Hash + fmt::Debug,
    M: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A registered feed. Dropping it unregisters from the router.
pub struct Subscription<K, M>
where
    K: Copy + Eq + Hash,
{
    topic: K,
    id: u64,
    rx: mpsc::UnboundedReceiver<M>,
    router: Weak<RouterInner<K, M>>,
}

impl<K, M> Subscription<K, M>
where
    K: Copy + Eq + Hash,
{
    pub fn topic(&self) -> K {
        self.topic
    }

    /// Wait for the next message. `None` once the router has closed.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Take the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        self.rx.try_recv().ok()
    }
}

impl<K, M> Drop for Subscription<K, M>
where
    K: Copy + Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(inner) = self.router.upgrade() {
            inner.remove(self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Topic {
        A,
        B,
    }

    #[tokio::test]
    async fn test_publish_reaches_only_topic_subscribers() {
        let router: NotificationRouter<Topic, u32> = NotificationRouter::new();
        let mut a = router.subscribe(Topic::A).unwrap();
        let mut b = router.subscribe(Topic::B).unwrap();

        assert_eq!(router.publish(Topic::A, 7), 1);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.try_recv(), None);
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_message_in_order() {
        let router: NotificationRouter<Topic, u32> = NotificationRouter::new();
        let mut slow = router.subscribe(Topic::A).unwrap();
        let mut fast = router.subscribe(Topic::A).unwrap();

        for i in 0..1000 {
            assert_eq!(router.publish(Topic::A, i), 2);
            assert_eq!(fast.recv().await, Some(i));
        }
        for i in 0..1000 {
            assert_eq!(slow.recv().await, Some(i));
        }
    }

    #[test]
    fn test_drop_unregisters() {
        let router: NotificationRouter<Topic, u32> = NotificationRouter::new();
        let sub = router.subscribe(Topic::A).unwrap();
        let _other = router.subscribe(Topic::A).unwrap();
        assert_eq!(router.subscriber_count(Topic::A), 2);
        drop(sub);
        assert_eq!(router.subscriber_count(Topic::A), 1);
        assert_eq!(router.publish(Topic::A, 1), 1);
    }

    #[tokio::test]
    async fn test_close_rejects_new_and_ends_feeds() {
        let router: NotificationRouter<Topic, u32> = NotificationRouter::new();
        let mut sub = router.subscribe(Topic::B).unwrap();
        router.publish(Topic::B, 3);
        router.close();

        assert!(router.is_closed());
        assert!(matches!(router.subscribe(Topic::B), Err(BridgeError::RouterClosed)));
        assert_eq!(router.publish(Topic::B, 4), 0);
        // queued message survives, then the feed ends
        assert_eq!(sub.recv().await, Some(3));
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let router: NotificationRouter<Topic, u32> = NotificationRouter::new();
        assert_eq!(router.publish(Topic::A, 1), 0);
        assert_eq!(router.subscriber_count(Topic::A), 0);
    }
}
