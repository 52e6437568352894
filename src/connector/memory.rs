// MIT License - Copyright (c) 2026 Peter Wright
// In-process connector for tests and offline runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Capabilities, PanelConnector};
use crate::category::{Category, ChannelId};
use crate::error::{BridgeError, Result};
use crate::mapper::{Control, TrackedChannels};

/// A control command as received by the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub control: Control,
    pub code: String,
    pub channel: ChannelId,
    pub on: bool,
}

/// Connector that records everything it is asked to do.
///
/// Read requests can be forwarded to a responder through
/// [`read_requests`](Self::read_requests), which lets a test play the panel.
pub struct MemoryConnector {
    capabilities: Capabilities,
    accepted_code: Option<String>,
    fail_reads: AtomicBool,
    closed: AtomicBool,
    reads: Mutex<Vec<Category>>,
    commands: Mutex<Vec<ControlCommand>>,
    tracked: Mutex<Option<TrackedChannels>>,
    responder: Mutex<Option<mpsc::UnboundedSender<Category>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::full())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            accepted_code: None,
            fail_reads: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reads: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            tracked: Mutex::new(None),
            responder: Mutex::new(None),
        }
    }

    /// Reject control commands carrying any other code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.accepted_code = Some(code.into());
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Forward every subsequent read request to the returned receiver.
    pub fn read_requests(&self) -> mpsc::UnboundedReceiver<Category> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.responder) = Some(tx);
        rx
    }

    pub fn capabilities_value(&self) -> Capabilities {
        self.capabilities
    }

    pub fn reads(&self) -> Vec<Category> {
        lock(&self.reads).clone()
    }

    pub fn commands(&self) -> Vec<ControlCommand> {
        lock(&self.commands).clone()
    }

    pub fn tracked(&self) -> Option<TrackedChannels> {
        lock(&self.tracked).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(BridgeError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn control(&self, control: Control, code: &str, channel: ChannelId, on: bool) -> Result<()> {
        self.ensure_open()?;
        if let Some(accepted) = &self.accepted_code
            && accepted != code
        {
            return Err(BridgeError::CommandRejected {
                reason: "invalid code".to_string(),
            });
        }
        lock(&self.commands).push(ControlCommand {
            control,
            code: code.to_string(),
            channel,
            on,
        });
        Ok(())
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PanelConnector for MemoryConnector {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn track(&self, tracked: &TrackedChannels) -> Result<()> {
        self.ensure_open()?;
        *lock(&self.tracked) = Some(tracked.clone());
        Ok(())
    }

    async fn request_read(&self, category: Category) -> Result<()> {
        self.ensure_open()?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BridgeError::Disconnected);
        }
        lock(&self.reads).push(category);
        if let Some(tx) = lock(&self.responder).as_ref()
            && tx.send(category).is_err()
        {
            debug!("Read responder for {} has gone away", category);
        }
        Ok(())
    }

    async fn set_output(&self, code: &str, channel: ChannelId, on: bool) -> Result<()> {
        self.control(Control::SetOutput, code, channel, on)
    }

    async fn set_bypass(&self, code: &str, channel: ChannelId, on: bool) -> Result<()> {
        self.control(Control::SetBypass, code, channel, on)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.responder).take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u32) -> ChannelId {
        ChannelId::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_records_commands() {
        let conn = MemoryConnector::new().with_code("1234");
        conn.set_output("1234", ch(2), true).await.unwrap();
        conn.set_bypass("1234", ch(4), false).await.unwrap();

        let cmds = conn.commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].control, Control::SetOutput);
        assert!(cmds[0].on);
        assert_eq!(cmds[1].channel, ch(4));
    }

    #[tokio::test]
    async fn test_rejects_wrong_code() {
        let conn = MemoryConnector::new().with_code("1234");
        let err = conn.set_output("0000", ch(2), true).await.unwrap_err();
        assert!(matches!(err, BridgeError::CommandRejected { .. }));
        assert!(conn.commands().is_empty());
    }

    #[tokio::test]
    async fn test_forwards_reads_to_responder() {
        let conn = MemoryConnector::new();
        let mut rx = conn.read_requests();
        conn.request_read(Category::Trouble).await.unwrap();
        assert_eq!(rx.recv().await, Some(Category::Trouble));
        assert_eq!(conn.reads(), vec![Category::Trouble]);
    }

    #[tokio::test]
    async fn test_closed_connector_refuses_work() {
        let conn = MemoryConnector::new();
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.request_read(Category::Alarm).await,
            Err(BridgeError::Disconnected)
        ));
    }
}
