// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use spa_lan_bridge::{
    ConnectionState, DeviceState, EventReceiver, SpaClient, SpaCommand, SpaConfig, SpaEvent,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "spa2mqtt")]
#[command(about = "Bridge between a hot tub controller and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    spa: SpaToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct SpaToml {
    host: String,
    #[serde(default = "default_spa_port")]
    port: u16,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_liveness_interval")]
    liveness_interval_ms: u64,
}

fn default_spa_port() -> u16 {
    4257
}
fn default_reconnect_delay() -> u64 {
    20000
}
fn default_liveness_interval() -> u64 {
    60000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "spa-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "spa/cmd".to_string()
}
fn default_publish_topic() -> String {
    "spa".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

/// Everything one run of the bridge needs, validated up front so a bad
/// reload can be rejected without touching the running settings.
#[derive(Debug, Clone)]
struct Settings {
    spa: SpaConfig,
    mqtt_host: String,
    mqtt_port: u16,
    client_id: String,
    subscribe_topic: String,
    publish_topic: String,
    snapshot_interval: Duration,
}

impl Settings {
    fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        let config: Config = toml::from_str(&text).context("Failed to parse config file")?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self> {
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
        let spa = SpaConfig::builder()
            .host(config.spa.host)
            .port(config.spa.port)
            .reconnect_delay_ms(config.spa.reconnect_delay_ms)
            .liveness_interval_ms(config.spa.liveness_interval_ms)
            .build();
        Ok(Self {
            spa,
            mqtt_host,
            mqtt_port,
            client_id: config.mqtt.client_id,
            subscribe_topic: config.mqtt.subscribe_topic,
            publish_topic: config.mqtt.publish_topic,
            snapshot_interval: Duration::from_secs(config.mqtt.snapshot_interval_secs.max(1)),
        })
    }
}

/// Split "mqtt://host:port" (or tcp://, or bare host:port) into its parts.
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let address = ["mqtt://", "tcp://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme))
        .unwrap_or(url);
    let (host, port) = address
        .rsplit_once(':')
        .with_context(|| format!("MQTT URL '{url}' must look like mqtt://host:port"))?;
    let port = port
        .parse()
        .with_context(|| format!("Invalid MQTT port in '{url}'"))?;
    Ok((host.to_string(), port))
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages share the flat {now, op, ...} shape

#[derive(Serialize)]
struct MqttSnapshot {
    now: u64,
    op: &'static str,
    state: MqttSpaState,
}

#[derive(Serialize)]
struct MqttSpaState {
    connection: String,
    #[serde(rename = "currentTemp")]
    current_temp: Option<u8>,
    #[serde(rename = "targetTemp")]
    target_temp: Option<u8>,
    range: Option<String>,
    heating: bool,
    #[serde(rename = "heatMode")]
    heat_mode: Option<String>,
    #[serde(rename = "filterMode")]
    filter_mode: bool,
    flow: String,
    #[serde(rename = "configKnown")]
    config_known: bool,
    pumps: Vec<MqttPumpState>,
    lights: Vec<MqttLightState>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "lastFault")]
    last_fault: Option<String>,
}

#[derive(Serialize)]
struct MqttPumpState {
    id: u8,
    speed: Option<u8>,
    capability: Option<u8>,
}

#[derive(Serialize)]
struct MqttLightState {
    id: u8,
    on: Option<bool>,
    mode: Option<String>,
}

impl MqttSnapshot {
    fn new(state: &DeviceState, connection: ConnectionState) -> Self {
        // Slots known to be absent are left out; unknown ones are shown.
        let pumps = state
            .pumps()
            .filter(|p| p.capability() != Some(0))
            .map(|p| MqttPumpState {
                id: p.id,
                speed: p.speed(),
                capability: p.capability(),
            })
            .collect();
        let lights = state
            .lights()
            .filter(|l| l.present != Some(false))
            .map(|l| MqttLightState {
                id: l.id,
                on: l.is_on(),
                mode: l.mode.map(|m| m.to_string()),
            })
            .collect();

        Self {
            now: now_epoch_ms(),
            op: "SNAPSHOT",
            state: MqttSpaState {
                connection: connection.to_string(),
                current_temp: state.current_temperature(),
                target_temp: state.target_temperature(),
                range: state.range().map(|r| r.to_string()),
                heating: state.is_heating(),
                heat_mode: state.heat_mode().map(|m| m.to_string()),
                filter_mode: state.is_filter_mode(),
                flow: state.flow_health().to_string(),
                config_known: state.is_configuration_known(),
                pumps,
                lights,
                last_fault: state.last_fault().map(|f| f.to_string()),
            },
        }
    }
}

// {now, op} on its own, or a CMD_ACK carrying the request and any reply data
#[derive(Serialize)]
struct MqttNotice {
    now: u64,
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Inbound command (subscribed), selected by its "op" field
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
enum MqttCommand {
    Snapshot,
    Ping,
    SetTemp { temperature: u8 },
    SetPump { pump: u8, speed: u8 },
    SetLight { light: u8, on: bool },
}

impl MqttCommand {
    /// The library command behind this request, if it is one.
    fn to_spa_command(&self) -> Option<SpaCommand> {
        match *self {
            Self::SetTemp { temperature } => Some(SpaCommand::SetTargetTemperature(temperature)),
            Self::SetPump { pump, speed } => Some(SpaCommand::SetPumpSpeed { pump, speed }),
            Self::SetLight { light, on } => Some(SpaCommand::SetLight { light, on }),
            Self::Snapshot | Self::Ping => None,
        }
    }
}

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// The MQTT client plus the topic everything is published on.
#[derive(Clone)]
struct Publisher {
    client: AsyncClient,
    topic: String,
}

impl Publisher {
    async fn json(&self, payload: &impl Serialize, retain: bool) {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize MQTT payload: {e}");
                return;
            }
        };
        if let Err(e) = self.client.publish(&self.topic, QoS::AtLeastOnce, retain, body).await {
            error!("Failed to publish to {}: {e}", self.topic);
        }
    }

    async fn notice(&self, op: &'static str) {
        let msg = MqttNotice {
            now: now_epoch_ms(),
            op,
            success: None,
            src: None,
            data: None,
        };
        self.json(&msg, false).await;
    }

    async fn ack(
        &self,
        success: bool,
        src: Option<serde_json::Value>,
        data: Option<serde_json::Value>,
    ) {
        let msg = MqttNotice {
            now: now_epoch_ms(),
            op: "CMD_ACK",
            success: Some(success),
            src,
            data,
        };
        self.json(&msg, false).await;
    }

    /// Publish the retained snapshot and hand it back for callers that echo it.
    async fn snapshot(&self, spa: &SpaClient) -> MqttSnapshot {
        let snapshot = MqttSnapshot::new(&spa.state(), spa.connection_state());
        self.json(&snapshot, true).await;
        snapshot
    }
}

// ---------------------------------------------------------------------------
// Spa events → MQTT
// ---------------------------------------------------------------------------

async fn forward_events(mut rx: EventReceiver, publisher: Publisher, spa: Arc<SpaClient>) {
    loop {
        match rx.recv().await {
            Ok(SpaEvent::Connected) => {
                info!("Spa connected");
                publisher.notice("CONNECTED").await;
            }
            Ok(SpaEvent::Disconnected) => {
                warn!("Spa disconnected");
                publisher.notice("DISCONNECTED").await;
                publisher.snapshot(&spa).await;
            }
            Ok(SpaEvent::Reconnected | SpaEvent::ConfigurationKnown) => {
                info!("Spa state reset ({}), publishing snapshot", spa.state().summary());
                publisher.snapshot(&spa).await;
            }
            Ok(SpaEvent::StateChanged) => {
                debug!("Spa state: {}", spa.state());
                publisher.snapshot(&spa).await;
            }
            Err(RecvError::Lagged(n)) => {
                // Snapshots are absolute, so one fresh one covers the gap.
                warn!("Spa event receiver lagged by {n} events");
                publisher.snapshot(&spa).await;
            }
            Err(RecvError::Closed) => {
                info!("Spa event channel closed");
                break;
            }
        }
    }
}

async fn publish_periodically(period: Duration, publisher: Publisher, spa: Arc<SpaClient>) {
    let mut ticker = interval(period);
    // The immediate first tick is covered by the startup snapshot.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        publisher.snapshot(&spa).await;
    }
}

// ---------------------------------------------------------------------------
// MQTT → spa commands
// ---------------------------------------------------------------------------

async fn handle_command(payload: &str, publisher: &Publisher, spa: &SpaClient) {
    // Echoed back in the ack so callers can match it to their request
    let src = serde_json::from_str::<serde_json::Value>(payload).ok();

    let command = match serde_json::from_str::<MqttCommand>(payload) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejecting MQTT command {payload}: {e}");
            publisher.ack(false, src, None).await;
            return;
        }
    };

    match command {
        MqttCommand::Snapshot => {
            debug!("MQTT command: snapshot");
            let snapshot = publisher.snapshot(spa).await;
            publisher.ack(true, src, serde_json::to_value(&snapshot).ok()).await;
        }
        MqttCommand::Ping => {
            info!("MQTT command: ping");
            publisher.ack(true, src, None).await;
        }
        other => {
            let Some(spa_command) = other.to_spa_command() else {
                return;
            };
            info!("MQTT command: {spa_command}");
            let success = match spa.send_command(spa_command).await {
                Ok(()) => true,
                Err(e) => {
                    error!("'{spa_command}' failed: {e}");
                    false
                }
            };
            publisher.ack(success, src, None).await;
        }
    }
}

async fn serve_mqtt(
    mut eventloop: EventLoop,
    publisher: Publisher,
    command_topic: String,
    spa: Arc<SpaClient>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Subscriptions do not survive a broker reconnect in rumqttc.
                info!("MQTT: connected, subscribing to {command_topic}");
                if let Err(e) = publisher.client.subscribe(&command_topic, QoS::AtLeastOnce).await {
                    error!("MQTT: subscribe to {command_topic} failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(msg))) if msg.topic == command_topic => {
                let payload = String::from_utf8_lossy(&msg.payload);
                handle_command(&payload, &publisher, &spa).await;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT: connection error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// How a run of the bridge ended.
enum Exit {
    Stop,
    Reload,
}

async fn wait_for_signal(sighup: &mut Signal, sigterm: &mut Signal) -> Exit {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, stopping");
            Exit::Stop
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, stopping");
            Exit::Stop
        }
        _ = sighup.recv() => {
            info!("SIGHUP received, reloading config");
            Exit::Reload
        }
    }
}

/// Run the bridge with one set of settings until a signal arrives.
async fn run(settings: &Settings, sighup: &mut Signal, sigterm: &mut Signal) -> Result<Exit> {
    info!("Starting spa session for {}", settings.spa.address());
    let spa = Arc::new(SpaClient::start(settings.spa.clone()));
    let events = spa.subscribe();

    let mut options = MqttOptions::new(&settings.client_id, &settings.mqtt_host, settings.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(options, 256);
    client
        .subscribe(&settings.subscribe_topic, QoS::AtLeastOnce)
        .await
        .context("Failed to subscribe to the command topic")?;

    let publisher = Publisher {
        client,
        topic: settings.publish_topic.clone(),
    };
    publisher.snapshot(&spa).await;

    let tasks = [
        tokio::spawn(forward_events(events, publisher.clone(), Arc::clone(&spa))),
        tokio::spawn(serve_mqtt(
            eventloop,
            publisher.clone(),
            settings.subscribe_topic.clone(),
            Arc::clone(&spa),
        )),
        tokio::spawn(publish_periodically(
            settings.snapshot_interval,
            publisher,
            Arc::clone(&spa),
        )),
    ];

    info!(
        "Bridging {} <-> {}:{} (commands on {}). SIGHUP reloads, SIGINT/SIGTERM stops.",
        settings.spa.address(),
        settings.mqtt_host,
        settings.mqtt_port,
        settings.subscribe_topic
    );
    let exit = wait_for_signal(sighup, sigterm).await;

    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        // Aborted tasks release their handle on the client here
        let _ = task.await;
    }

    match Arc::try_unwrap(spa) {
        Ok(mut spa) => {
            if let Err(e) = spa.disconnect().await {
                warn!("Spa disconnect failed: {e}");
            }
        }
        Err(_) => warn!("Spa client still shared, dropping without a clean disconnect"),
    }
    Ok(exit)
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=spa_lan_bridge=trace).
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
    let mut settings = Settings::load(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    while let Exit::Reload = run(&settings, &mut sighup, &mut sigterm).await? {
        // A broken file leaves the bridge running on what it had.
        match Settings::load(&cli.config) {
            Ok(reloaded) => {
                info!("Config reloaded from {}", cli.config);
                settings = reloaded;
            }
            Err(e) => warn!("Config reload failed, keeping previous settings: {e:#}"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}
