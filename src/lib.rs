// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra status bridge
//
//! # satel-bridge
//!
//! Status mapping and change notification for Satel Integra alarm panels.
//!
//! Configured zones, outputs, expanders, keypads and trouble inputs are mapped
//! onto the panel's `(category, channel)` status bits and exposed as binary
//! entities. Full-category snapshots pushed by a panel connector are cached per
//! category and fanned out to one observer per entity, which reports only
//! real state changes to the host.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use satel_bridge::{Bridge, BridgeConfig, ChannelSink, MemoryConnector, SensorClass};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::builder()
//!         .zone(1, "Hall", SensorClass::Motion)
//!         .expander(5, "Garage", true)
//!         .build();
//!
//!     let bridge = Bridge::start(&config, Arc::new(MemoryConnector::new())).await?;
//!     let (sink, mut reports) = ChannelSink::new();
//!     bridge.attach(Arc::new(sink)).await?;
//!
//!     bridge.handle_push("trouble2", [5]).await;
//!     while let Some(report) = reports.recv().await {
//!         println!("{}: {}", report.entity.name, report.on);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod category;
pub mod config;
pub mod connector;
pub mod devices;
pub mod error;
pub mod event;
pub mod mapper;
pub mod observer;
pub mod router;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use bridge::Bridge;
pub use category::{Category, CategorySet, ChannelId};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use connector::memory::{ControlCommand, MemoryConnector};
pub use connector::{Capabilities, PanelConnector};
pub use devices::{DeviceGroup, DeviceKind, SensorClass};
pub use error::{BridgeError, Result};
pub use event::{StatusRouter, StatusUpdate};
pub use mapper::{map_devices, ChannelMap, Condition, Control, MappedChannel, TrackedChannels};
pub use observer::{ChannelSink, EntityInfo, EntitySink, Observer, StateReport};
pub use router::{NotificationRouter, Subscription};
pub use store::{Snapshot, SnapshotStore};
