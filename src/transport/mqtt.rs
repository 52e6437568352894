// MIT License - Copyright (c) 2026 Peter Wright
// MQTT panel link and entity publisher

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, QoS, SubAck, SubscribeFilter, SubscribeReasonCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

use crate::bridge::Bridge;
use crate::category::{Category, ChannelId};
use crate::connector::{Capabilities, PanelConnector};
use crate::error::{BridgeError, Result};
use crate::mapper::TrackedChannels;
use crate::observer::{EntityInfo, EntitySink};

pub fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

// ---------------------------------------------------------------------------
// Panel side: messages exchanged with the panel protocol service
// ---------------------------------------------------------------------------

/// Inbound message on the panel status topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op")]
pub enum PanelMessage {
    /// Full snapshot of one category. `category` is kept raw so unknown
    /// names can be reported and skipped.
    #[serde(rename = "STATUS")]
    Status { category: String, channels: Vec<u32> },
    /// Outcome of a control command, matched by sequence number.
    #[serde(rename = "CMD_ACK")]
    CmdAck {
        seq: u32,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

pub fn parse_panel_message(payload: &[u8]) -> Result<PanelMessage> {
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadRequest {
    now: u64,
    op: &'static str,
    category: Category,
}

#[derive(Debug, Serialize)]
pub(crate) struct TrackRequest {
    now: u64,
    op: &'static str,
    category: Category,
    channels: Vec<ChannelId>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ControlRequest<'a> {
    now: u64,
    op: &'static str,
    seq: u32,
    channel: ChannelId,
    on: bool,
    code: &'a str,
}

#[derive(Debug)]
struct CommandAck {
    success: bool,
    error: Option<String>,
}

type PendingAcks = Arc<Mutex<HashMap<u32, oneshot::Sender<CommandAck>>>>;

/// Connector speaking JSON over MQTT to a panel protocol service.
///
/// Requests go out on the command topic. The owner of the MQTT event loop
/// feeds everything received on the status topic into
/// [`handle_panel_message`](Self::handle_panel_message).
pub struct MqttConnector {
    client: AsyncClient,
    command_topic: String,
    capabilities: Capabilities,
    command_timeout: Duration,
    next_seq: AtomicU32,
    pending: PendingAcks,
}

impl MqttConnector {
    pub fn new(
        client: AsyncClient,
        command_topic: impl Into<String>,
        capabilities: Capabilities,
        command_timeout: Duration,
    ) -> Self {
        Self {
            client,
            command_topic: command_topic.into(),
            capabilities,
            command_timeout,
            next_seq: AtomicU32::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn send<T: Serialize>(&self, request: &T) -> Result<()> {
        let json = serde_json::to_vec(request)?;
        self.client
            .publish(&self.command_topic, QoS::AtLeastOnce, false, json)
            .await?;
        Ok(())
    }

    async fn send_control(&self, op: &'static str, code: &str, channel: ChannelId, on: bool) -> Result<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        let request = ControlRequest {
            now: now_epoch_ms(),
            op,
            seq,
            channel,
            on,
            code,
        };
        if let Err(e) = self.send(&request).await {
            self.pending.lock().await.remove(&seq);
            return Err(e);
        }
        debug!("Command sent (seq {}): {} {} {}", seq, op, channel, on);

        match timeout(self.command_timeout, rx).await {
            Ok(Ok(ack)) if ack.success => Ok(()),
            Ok(Ok(ack)) => Err(BridgeError::CommandRejected {
                reason: ack.error.unwrap_or_else(|| "rejected by panel".to_string()),
            }),
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => {
                self.pending.lock().await.remove(&seq);
                debug!("Command timeout: seq {} {}", seq, op);
                Err(BridgeError::CommandTimeout {
                    command: format!("{op} {channel}"),
                })
            }
        }
    }

    /// Complete the command waiting on `seq`. Returns false if none was waiting.
    pub async fn resolve_ack(&self, seq: u32, success: bool, error: Option<String>) -> bool {
        match self.pending.lock().await.remove(&seq) {
            Some(tx) => tx.send(CommandAck { success, error }).is_ok(),
            None => false,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Route one payload from the status topic.
    pub async fn handle_panel_message(&self, bridge: &Bridge, payload: &[u8]) {
        match parse_panel_message(payload) {
            Ok(PanelMessage::Status { category, channels }) => {
                bridge.handle_push(&category, channels).await;
            }
            Ok(PanelMessage::CmdAck { seq, success, error }) => {
                if !self.resolve_ack(seq, success, error).await {
                    debug!("Ack for unknown or expired command seq {}", seq);
                }
            }
            Err(e) => warn!("Failed to parse panel message: {}", e),
        }
    }
}

#[async_trait]
impl PanelConnector for MqttConnector {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn track(&self, tracked: &TrackedChannels) -> Result<()> {
        for (category, channels) in tracked.iter() {
            self.send(&TrackRequest {
                now: now_epoch_ms(),
                op: "TRACK",
                category,
                channels: channels.iter().copied().collect(),
            })
            .await?;
        }
        Ok(())
    }

    async fn request_read(&self, category: Category) -> Result<()> {
        self.send(&ReadRequest {
            now: now_epoch_ms(),
            op: "READ",
            category,
        })
        .await
    }

    async fn set_output(&self, code: &str, channel: ChannelId, on: bool) -> Result<()> {
        self.send_control("SET_OUTPUT", code, channel, on).await
    }

    async fn set_bypass(&self, code: &str, channel: ChannelId, on: bool) -> Result<()> {
        self.send_control("SET_BYPASS", code, channel, on).await
    }

    async fn close(&self) -> Result<()> {
        // dropping the senders fails any command still waiting
        self.pending.lock().await.clear();
        self.client.disconnect().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host side: entity state and commands
// ---------------------------------------------------------------------------

pub fn entity_state_topic(prefix: &str, unique_id: &str) -> String {
    format!("{prefix}/entity/{unique_id}")
}

/// Subscribe to the panel status topic and the entity command filter in one
/// request, status first, so a single SUBACK covers both.
pub async fn subscribe_topics(client: &AsyncClient, status_topic: &str, command_filter: &str) -> Result<()> {
    client
        .subscribe_many([
            SubscribeFilter::new(status_topic.to_string(), QoS::AtLeastOnce),
            SubscribeFilter::new(command_filter.to_string(), QoS::AtLeastOnce),
        ])
        .await?;
    Ok(())
}

/// Whether a SUBACK for [`subscribe_topics`] grants the status topic.
pub fn status_subscribed(ack: &SubAck) -> bool {
    matches!(ack.return_codes.first(), Some(SubscribeReasonCode::Success(_)))
}

/// Subscription filter matching every entity command topic.
pub fn entity_command_filter(prefix: &str) -> String {
    format!("{prefix}/entity/+/set")
}

/// Extract the unique id from `<prefix>/entity/<id>/set`.
pub fn entity_from_command_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let id = topic
        .strip_prefix(prefix)?
        .strip_prefix("/entity/")?
        .strip_suffix("/set")?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

#[derive(Deserialize)]
struct SwitchCommand {
    on: bool,
}

/// Parse an entity command payload: `ON`/`OFF` (any case), `true`/`false`,
/// `1`/`0`, or JSON `{"on": bool}`.
pub fn parse_switch_payload(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    match text.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => serde_json::from_str::<SwitchCommand>(text).ok().map(|c| c.on),
    }
}

/// Retained state message for one entity.
#[derive(Debug, Serialize)]
pub struct EntityStatePayload<'a> {
    pub now: u64,
    pub op: &'static str,
    pub id: &'a str,
    pub name: &'a str,
    pub category: Category,
    pub channel: ChannelId,
    pub class: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    pub switchable: bool,
    pub on: bool,
}

impl<'a> EntityStatePayload<'a> {
    pub fn new(entity: &'a EntityInfo, on: bool) -> Self {
        Self {
            now: now_epoch_ms(),
            op: "ENTITY_STATE",
            id: &entity.unique_id,
            name: &entity.name,
            category: entity.category,
            channel: entity.channel,
            class: entity.class.as_str(),
            icon: entity.icon(),
            switchable: entity.is_switchable(),
            on,
        }
    }
}

/// One entry of the retained entity list.
#[derive(Debug, Serialize)]
pub struct EntityDescriptor<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub device_type: &'static str,
    pub ordinal: u32,
    pub category: Category,
    pub channel: ChannelId,
    pub class: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    pub switchable: bool,
}

/// Retained list of every entity the bridge exposes.
#[derive(Debug, Serialize)]
pub struct EntityListPayload<'a> {
    pub now: u64,
    pub op: &'static str,
    pub entities: Vec<EntityDescriptor<'a>>,
}

impl<'a> EntityListPayload<'a> {
    pub fn new(entities: &'a [EntityInfo]) -> Self {
        Self {
            now: now_epoch_ms(),
            op: "ENTITIES",
            entities: entities
                .iter()
                .map(|e| EntityDescriptor {
                    id: &e.unique_id,
                    name: &e.name,
                    device_type: e.device_type,
                    ordinal: e.ordinal,
                    category: e.category,
                    channel: e.channel,
                    class: e.class.as_str(),
                    icon: e.icon(),
                    switchable: e.is_switchable(),
                })
                .collect(),
        }
    }
}

/// Reply to an entity command.
#[derive(Debug, Serialize)]
pub struct EntityCommandAck<'a> {
    pub now: u64,
    pub op: &'static str,
    pub id: &'a str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> EntityCommandAck<'a> {
    pub fn new(unique_id: &'a str, outcome: &Result<()>) -> Self {
        Self {
            now: now_epoch_ms(),
            op: "CMD_ACK",
            id: unique_id,
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Publishes entity state as retained JSON under `<prefix>/entity/<id>`.
pub struct MqttEntitySink {
    client: AsyncClient,
    prefix: String,
}

impl MqttEntitySink {
    pub fn new(client: AsyncClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl EntitySink for MqttEntitySink {
    async fn report(&self, entity: &EntityInfo, on: bool) {
        let topic = entity_state_topic(&self.prefix, &entity.unique_id);
        match serde_json::to_vec(&EntityStatePayload::new(entity, on)) {
            Ok(json) => {
                // waits for room in the client queue
                if let Err(e) = self.client.publish(&topic, QoS::AtLeastOnce, true, json).await {
                    error!("Failed to publish to {topic}: {e}");
                }
            }
            Err(e) => error!("Failed to serialize entity state: {e}"),
        }
    }
}
