// MIT License - Copyright (c) 2026 Peter Wright
// Bridge context: mapping, store, router and observers for one panel

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::config::BridgeConfig;
use crate::connector::{Capabilities, PanelConnector};
use crate::error::{BridgeError, Result};
use crate::event::StatusRouter;
use crate::mapper::{map_devices, ChannelMap, Control};
use crate::observer::{EntityInfo, EntitySink, Observer};
use crate::store::{Snapshot, SnapshotStore};

/// One running bridge between a panel connector and an entity host.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use satel_bridge::{Bridge, BridgeConfig, ChannelSink, MemoryConnector, SensorClass};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = BridgeConfig::builder()
///         .code("1234")
///         .zone(1, "Hall", SensorClass::Motion)
///         .switchable_output(2, "Gate")
///         .build();
///
///     let bridge = Bridge::start(&config, Arc::new(MemoryConnector::new())).await?;
///     bridge.prime().await;
///
///     let (sink, mut reports) = ChannelSink::new();
///     bridge.attach(Arc::new(sink)).await?;
///     tokio::spawn(async move {
///         while let Some(report) = reports.recv().await {
///             println!("{} -> {}", report.entity.name, report.on);
///         }
///     });
///
///     bridge.handle_push("violation", [1]).await;
///     bridge.switch("satel_switchable_output_output_active_2", true).await?;
///
///     bridge.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Bridge {
    connector: Arc<dyn PanelConnector>,
    capabilities: Capabilities,
    channels: ChannelMap,
    router: Arc<StatusRouter>,
    store: Arc<SnapshotStore>,
    code: Option<String>,
    initial_status_wait: Duration,
    observers: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Validate the configuration, map devices and hand the tracked channels
    /// to the connector.
    ///
    /// Mapping errors are fatal: nothing is sent to the connector if two
    /// devices collide.
    pub async fn start(config: &BridgeConfig, connector: Arc<dyn PanelConnector>) -> Result<Self> {
        config.validate()?;
        let capabilities = connector.capabilities();
        let channels = map_devices(&config.devices())?;

        connector.track(channels.tracked()).await?;

        let router = Arc::new(StatusRouter::new());
        let store = Arc::new(SnapshotStore::new(
            connector.clone(),
            capabilities,
            router.clone(),
            config.bootstrap_timeout(),
        ));

        info!(
            "Bridge started with {} entities across {} categories",
            channels.len(),
            channels.tracked().categories().categories().count()
        );

        Ok(Self {
            connector,
            capabilities,
            channels,
            router,
            store,
            code: config.alarm_code().map(str::to_string),
            initial_status_wait: config.initial_status_wait(),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Request every readable tracked category, then let the answers settle.
    ///
    /// Pushes must already be flowing into [`push`](Self::push) while this runs.
    pub async fn prime(&self) {
        let categories = self.channels.tracked().categories() & self.capabilities.reads;
        for category in categories.categories() {
            if let Err(e) = self.connector.request_read(category).await {
                warn!("Initial {} status request failed: {}", category, e);
            }
        }
        debug!("Waiting {:?} for initial status", self.initial_status_wait);
        sleep(self.initial_status_wait).await;
    }

    /// Host-facing description of every mapped entity.
    pub fn entities(&self) -> Vec<EntityInfo> {
        self.channels.entries().iter().map(EntityInfo::from).collect()
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<StatusRouter> {
        &self.router
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Start one observer per entity, reporting into `sink`.
    ///
    /// Returns once every observer has bootstrapped and reported its initial
    /// state. Yields the number of observers started.
    pub async fn attach(&self, sink: Arc<dyn EntitySink>) -> Result<usize> {
        if self.router.is_closed() {
            return Err(BridgeError::RouterClosed);
        }

        let mut ready = Vec::new();
        for entity in self.entities() {
            let store = self.store.clone();
            let router = self.router.clone();
            let sink = sink.clone();
            let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

            let handle = tokio::spawn(async move {
                let mut observer = Observer::new(entity, sink);
                let result = observer.bootstrap(&store, &router).await;
                let ok = result.is_ok();
                if let Err(e) = result {
                    warn!("Observer for {} failed to start: {}", observer.entity().unique_id, e);
                }
                let _ = ready_tx.send(ok);
                if ok {
                    observer.run().await;
                }
            });

            self.observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
            ready.push(ready_rx);
        }

        let mut started = 0;
        for rx in ready {
            if rx.await.unwrap_or(false) {
                started += 1;
            }
        }
        info!("{} observers attached", started);
        Ok(started)
    }

    /// Apply a full snapshot pushed by the connector.
    ///
    /// Pushes for categories the connector did not declare are ignored.
    pub async fn push(&self, category: Category, snapshot: Snapshot) -> usize {
        if !self.capabilities.pushes.has(category) {
            warn!("Ignoring push for undeclared category {}", category);
            return 0;
        }
        debug!("Push for {}: {} active channels", category, snapshot.len());
        self.store.update(category, snapshot).await
    }

    /// Apply a push identified by raw category name.
    pub async fn handle_push<I>(&self, category_name: &str, channels: I) -> usize
    where
        I: IntoIterator<Item = u32>,
    {
        match Category::from_name(category_name) {
            Some(category) => self.push(category, Snapshot::from_raw(channels)).await,
            None => {
                warn!("Ignoring push for unknown category {:?}", category_name);
                0
            }
        }
    }

    /// Drive a controllable entity on or off.
    ///
    /// Nothing changes locally: the new state arrives as a later push.
    pub async fn switch(&self, unique_id: &str, on: bool) -> Result<()> {
        let entry = self
            .channels
            .find(unique_id)
            .ok_or_else(|| BridgeError::UnknownEntity {
                unique_id: unique_id.to_string(),
            })?;
        let control = entry.control.ok_or_else(|| BridgeError::NotControllable {
            unique_id: unique_id.to_string(),
        })?;
        let code = self.code.as_deref().ok_or(BridgeError::MissingAlarmCode)?;

        info!(
            "Switching {} ({}) {}",
            entry.label,
            unique_id,
            if on { "on" } else { "off" }
        );
        match control {
            Control::SetOutput => self.connector.set_output(code, entry.channel, on).await,
            Control::SetBypass => self.connector.set_bypass(code, entry.channel, on).await,
        }
    }

    /// Close the router, wait for observers to drain and close the connector.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down bridge");
        self.router.close();

        let handles: Vec<_> = std::mem::take(
            &mut *self.observers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                warn!("Observer task failed: {}", e);
            }
        }

        self.connector.close().await
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.router.close();
        for handle in self
            .observers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}
