// MIT License - Copyright (c) 2026 Peter Wright
// Per-entity state tracking

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::category::{Category, ChannelId};
use crate::devices::SensorClass;
use crate::error::Result;
use crate::event::{StatusFeed, StatusRouter, StatusUpdate};
use crate::mapper::{Control, MappedChannel};
use crate::store::SnapshotStore;

/// Host-facing description of one binary entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub unique_id: String,
    pub name: String,
    pub device_type: &'static str,
    pub ordinal: u32,
    pub category: Category,
    pub channel: ChannelId,
    pub class: SensorClass,
    pub control: Option<Control>,
}

impl EntityInfo {
    pub fn icon(&self) -> Option<&'static str> {
        self.class.icon()
    }

    pub fn is_switchable(&self) -> bool {
        self.control.is_some()
    }
}

impl From<&MappedChannel> for EntityInfo {
    fn from(mapped: &MappedChannel) -> Self {
        Self {
            unique_id: mapped.unique_id(),
            name: mapped.label.clone(),
            device_type: mapped.device_type,
            ordinal: mapped.ordinal,
            category: mapped.category,
            channel: mapped.channel,
            class: mapped.class.clone(),
            control: mapped.control,
        }
    }
}

/// Receiver of entity state reports.
///
/// Implementations wait rather than drop a report when their output is busy.
#[async_trait]
pub trait EntitySink: Send + Sync {
    async fn report(&self, entity: &EntityInfo, on: bool);
}

/// A state report as delivered by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReport {
    pub entity: EntityInfo,
    pub on: bool,
}

/// Sink that queues every report on an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StateReport>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StateReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EntitySink for ChannelSink {
    async fn report(&self, entity: &EntityInfo, on: bool) {
        if self
            .tx
            .send(StateReport {
                entity: entity.clone(),
                on,
            })
            .is_err()
        {
            trace!("State report for {} dropped, receiver gone", entity.unique_id);
        }
    }
}

/// Tracks the on/off state of one `(category, channel)` and reports changes.
pub struct Observer {
    entity: EntityInfo,
    state: bool,
    // sequence number of the last snapshot applied
    seen: u64,
    sink: Arc<dyn EntitySink>,
    feed: Option<StatusFeed>,
}

impl Observer {
    pub fn new(entity: EntityInfo, sink: Arc<dyn EntitySink>) -> Self {
        Self {
            entity,
            state: false,
            seen: 0,
            sink,
            feed: None,
        }
    }

    pub fn entity(&self) -> &EntityInfo {
        &self.entity
    }

    pub fn state(&self) -> bool {
        self.state
    }

    /// Prime from the store, then join the live stream.
    ///
    /// The order matters: refresh first, subscribe second, read the cache
    /// last. Any push landing after the refresh is either already in the cache
    /// at the final read or queued on the new feed, or both. Feed entries at or
    /// below the sequence number read from the cache are skipped, so nothing
    /// is applied twice. The initial state is reported exactly once.
    pub async fn bootstrap(&mut self, store: &SnapshotStore, router: &StatusRouter) -> Result<()> {
        store.refresh(self.entity.category).await;
        self.subscribe(router)?;
        self.sync(store).await;
        Ok(())
    }

    fn subscribe(&mut self, router: &StatusRouter) -> Result<()> {
        self.feed = Some(router.subscribe(self.entity.category)?);
        Ok(())
    }

    async fn sync(&mut self, store: &SnapshotStore) {
        let latest = store.latest(self.entity.category);
        self.seen = latest.seq;
        self.state = latest.snapshot.is_active(self.entity.channel);

        debug!(
            "{} bootstrapped {} at seq {}",
            self.entity.unique_id,
            if self.state { "on" } else { "off" },
            self.seen
        );
        self.sink.report(&self.entity, self.state).await;
    }

    /// Apply a snapshot and report if this entity's state flipped.
    ///
    /// Updates for other categories, and snapshots already seen, are ignored.
    pub async fn apply(&mut self, update: &StatusUpdate) -> bool {
        if update.category != self.entity.category || update.seq <= self.seen {
            return false;
        }
        self.seen = update.seq;
        let on = update.snapshot.is_active(self.entity.channel);
        if on == self.state {
            return false;
        }
        self.state = on;
        trace!("{} -> {}", self.entity.unique_id, if on { "on" } else { "off" });
        self.sink.report(&self.entity, on).await;
        true
    }

    /// Wait for the next update and apply it.
    ///
    /// Returns whether the state changed, or `None` once the feed has ended
    /// (or was never opened).
    pub async fn next_update(&mut self) -> Option<bool> {
        let update = self.feed.as_mut()?.recv().await?;
        Some(self.apply(&update).await)
    }

    /// Process updates until the feed ends.
    pub async fn run(mut self) {
        while self.next_update().await.is_some() {}
        debug!("Feed for {} ended", self.entity.unique_id);
    }
}
