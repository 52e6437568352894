// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use satel_bridge::transport::mqtt::{
    entity_command_filter, entity_from_command_topic, parse_switch_payload, status_subscribed,
    subscribe_topics, EntityCommandAck, EntityListPayload, MqttConnector, MqttEntitySink,
};
use satel_bridge::{map_devices, Bridge, BridgeConfig, BridgeError, Capabilities, EntityInfo};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "satel2mqtt")]
#[command(about = "Bridge between a Satel Integra alarm panel and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Validate the configuration, print the entity table and exit
    #[arg(long)]
    check: bool,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(flatten)]
    bridge: BridgeConfig,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    /// Prefix for entity state, entity commands and acks
    #[serde(default = "default_topic_prefix")]
    topic_prefix: String,
    #[serde(default = "default_panel_command_topic")]
    panel_command_topic: String,
    #[serde(default = "default_panel_status_topic")]
    panel_status_topic: String,
    #[serde(default = "default_command_timeout")]
    command_timeout_ms: u64,
    /// The panel service pushes status but cannot answer read requests
    #[serde(default)]
    push_only: bool,
    #[serde(default = "default_retry_delay")]
    retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    /// How long to wait for the status subscription before priming anyway
    #[serde(default = "default_subscribe_timeout")]
    subscribe_timeout_ms: u64,
}

fn default_client_id() -> String {
    "satel2mqtt".to_string()
}
fn default_topic_prefix() -> String {
    "satel".to_string()
}
fn default_panel_command_topic() -> String {
    "satel/panel/cmd".to_string()
}
fn default_panel_status_topic() -> String {
    "satel/panel/status".to_string()
}
fn default_command_timeout() -> u64 {
    5000
}
fn default_retry_delay() -> u64 {
    2000
}
fn default_max_retries() -> u32 {
    3
}
fn default_subscribe_timeout() -> u64 {
    10_000
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

fn print_entities(entities: &[EntityInfo]) {
    println!("{:<48} {:<14} {:>7}  NAME", "ID", "CATEGORY", "CHANNEL");
    for e in entities {
        println!("{:<48} {:<14} {:>7}  {}", e.unique_id, e.category, e.channel, e.name);
    }
    println!("{} entities", entities.len());
}

/// Start the bridge, retrying transient failures with exponential backoff.
async fn start_bridge(config: &Config, connector: Arc<MqttConnector>) -> Result<Bridge> {
    let mut attempt: u32 = 0;
    loop {
        match Bridge::start(&config.bridge, connector.clone()).await {
            Ok(bridge) => return Ok(bridge),
            Err(e) if e.is_retryable() && attempt < config.mqtt.max_retries => {
                attempt += 1;
                let delay_ms = config.mqtt.retry_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(
                    "Bridge start failed ({e}), retrying in {:.1}s...",
                    delay_ms as f64 / 1000.0
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) => return Err(e).context("Failed to start bridge"),
        }
    }
}

/// Wait until the event loop reports the status topic subscribed.
///
/// Status requests sent before that would have their answers dropped by the
/// broker. Returns false on timeout.
async fn wait_for_subscription(subscribed: &Notify, limit: Duration) -> bool {
    match timeout(limit, subscribed.notified()).await {
        Ok(()) => true,
        Err(_) => {
            warn!("Status topic not subscribed after {limit:?}, priming anyway");
            false
        }
    }
}

async fn handle_entity_command(bridge: Arc<Bridge>, client: AsyncClient, ack_topic: String, id: String, payload: Vec<u8>) {
    let outcome = match parse_switch_payload(&payload) {
        Some(on) => bridge.switch(&id, on).await,
        None => Err(BridgeError::CommandRejected {
            reason: format!("invalid switch payload: {}", String::from_utf8_lossy(&payload)),
        }),
    };
    match &outcome {
        Ok(()) => info!("Command for {id} accepted"),
        Err(e) => warn!("Command for {id} failed: {e}"),
    }
    publish_json(&client, &ack_topic, &EntityCommandAck::new(&id, &outcome), false).await;
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=satel_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if cli.check {
        config.bridge.validate().context("Invalid configuration")?;
        let map = map_devices(&config.bridge.devices()).context("Invalid device layout")?;
        let entities: Vec<EntityInfo> = map.entries().iter().map(EntityInfo::from).collect();
        print_entities(&entities);
        return Ok(());
    }

    let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
    mqtt_opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

    let capabilities = if config.mqtt.push_only {
        Capabilities::push_only()
    } else {
        Capabilities::full()
    };
    let connector = Arc::new(MqttConnector::new(
        client.clone(),
        &config.mqtt.panel_command_topic,
        capabilities,
        Duration::from_millis(config.mqtt.command_timeout_ms),
    ));

    info!("Connecting to MQTT broker at {mqtt_host}:{mqtt_port}");
    let bridge = Arc::new(start_bridge(&config, connector.clone()).await?);

    // MQTT event loop: panel status, command acks and entity commands
    let status_topic = config.mqtt.panel_status_topic.clone();
    let command_filter = entity_command_filter(&config.mqtt.topic_prefix);
    let prefix = config.mqtt.topic_prefix.clone();
    let ack_topic = format!("{prefix}/ack");
    let bridge_loop = bridge.clone();
    let connector_loop = connector.clone();
    let client_loop = client.clone();
    let subscribed = Arc::new(Notify::new());
    let subscribed_loop = subscribed.clone();
    let mqtt_handle = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // rumqttc does not resubscribe after a broker reconnect
                    info!("MQTT: connected, subscribing to {status_topic} and {command_filter}");
                    if let Err(e) = subscribe_topics(&client_loop, &status_topic, &command_filter).await {
                        error!("Failed to subscribe: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if status_subscribed(&ack) {
                        debug!("MQTT: subscribed to {status_topic}");
                        subscribed_loop.notify_one();
                    } else {
                        error!("Broker refused subscription to {status_topic}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    if msg.topic == status_topic {
                        connector_loop.handle_panel_message(&bridge_loop, &msg.payload).await;
                    } else if let Some(id) = entity_from_command_topic(&prefix, &msg.topic) {
                        debug!("Entity command for {id}: {:?}", msg.payload);
                        // the switch waits for a CMD_ACK that arrives through this loop
                        tokio::spawn(handle_entity_command(
                            bridge_loop.clone(),
                            client_loop.clone(),
                            ack_topic.clone(),
                            id.to_string(),
                            msg.payload.to_vec(),
                        ));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    wait_for_subscription(&subscribed, Duration::from_millis(config.mqtt.subscribe_timeout_ms)).await;
    bridge.prime().await;

    let entities = bridge.entities();
    publish_json(
        &client,
        &format!("{}/entities", config.mqtt.topic_prefix),
        &EntityListPayload::new(&entities),
        true,
    )
    .await;

    let sink = Arc::new(MqttEntitySink::new(client.clone(), &config.mqtt.topic_prefix));
    let started = bridge.attach(sink).await?;
    info!("MQTT bridge running with {started} entities. Send SIGINT/SIGTERM to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
    }

    // the event loop must keep running until the disconnect is sent
    if let Err(e) = bridge.shutdown().await {
        warn!("Error during shutdown: {e}");
    }
    sleep(Duration::from_millis(100)).await;
    mqtt_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
