// MIT License - Copyright (c) 2026 Peter Wright
// Panel link abstraction

pub mod memory;

use async_trait::async_trait;

use crate::category::{Category, CategorySet, ChannelId};
use crate::error::{BridgeError, Result};
use crate::mapper::TrackedChannels;

/// What a connector can do, queried once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Categories that can be read on demand.
    pub reads: CategorySet,
    /// Categories the connector pushes snapshots for.
    pub pushes: CategorySet,
}

impl Capabilities {
    /// Read and push support for every category.
    pub fn full() -> Self {
        Self {
            reads: CategorySet::all(),
            pushes: CategorySet::all(),
        }
    }

    /// Push-only link with no on-demand reads.
    pub fn push_only() -> Self {
        Self {
            reads: CategorySet::empty(),
            pushes: CategorySet::all(),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Link to an alarm panel.
///
/// Reads are fire-and-forget: the answer comes back as an ordinary push. Pushes
/// are fed into the bridge by whoever owns the link's receive loop.
#[async_trait]
pub trait PanelConnector: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Tell the panel which channels matter, per category.
    async fn track(&self, _tracked: &TrackedChannels) -> Result<()> {
        Ok(())
    }

    /// Request a snapshot of `category`.
    async fn request_read(&self, category: Category) -> Result<()>;

    async fn set_output(&self, _code: &str, _channel: ChannelId, _on: bool) -> Result<()> {
        Err(BridgeError::Unsupported {
            operation: "set_output".to_string(),
        })
    }

    async fn set_bypass(&self, _code: &str, _channel: ChannelId, _on: bool) -> Result<()> {
        Err(BridgeError::Unsupported {
            operation: "set_bypass".to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
