//! MQTT transport adapter.
//!
//! Subscribes to the telemetry topic and hands every publish body to
//! [`EnergyPipeline::ingest_payload`]. The `rumqttc` event loop reconnects on
//! the next poll after an error; the subscription is renewed on every
//! `ConnAck`. The same client publishes relay and reboot commands to the
//! meter through [`DeviceCommands`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, Transport};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::pipeline::EnergyPipeline;

// ---

/// Host, port and TLS flag parsed from a broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `tcp://`, `mqtt://`, `ssl://` or `mqtts://` URLs. A bare `host[:port]`
/// is treated as `tcp://`.
pub fn parse_broker_url(url: &str) -> Result<BrokerAddr> {
    // ---
    let (tls, rest) = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => (false, rest),
        Some(("ssl" | "mqtts", rest)) => (true, rest),
        Some((scheme, _)) => {
            return Err(AppError::Config(format!(
                "unsupported MQTT scheme '{scheme}' in '{url}'"
            )))
        }
        None => (false, url),
    };

    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| AppError::Config(format!("invalid MQTT port in '{url}': {e}")))?;
            (host, port)
        }
        None => (authority, if tls { 8883 } else { 1883 }),
    };

    if host.is_empty() {
        return Err(AppError::Config(format!("missing MQTT host in '{url}'")));
    }
    Ok(BrokerAddr {
        host: host.to_string(),
        port,
        tls,
    })
}

pub fn qos(v: u8) -> QoS {
    match v {
        2 => QoS::ExactlyOnce,
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Connection settings, taken from [`crate::Config`].
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub control_topic: String,
    pub reboot_topic: String,
    pub qos: u8,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

pub fn build_options(settings: &MqttSettings) -> Result<MqttOptions> {
    // ---
    let addr = parse_broker_url(&settings.broker)?;
    let client_id = format!("powermeter-rollup-{}", Uuid::new_v4());

    let mut opts = MqttOptions::new(client_id, addr.host, addr.port);
    opts.set_keep_alive(settings.keep_alive);
    opts.set_clean_session(true);
    if let (Some(u), Some(p)) = (&settings.username, &settings.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if addr.tls {
        opts.set_transport(Transport::tls_with_default_config());
    }
    Ok(opts)
}

/// Relay state requested from the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "on" => Ok(RelayState::On),
            "off" => Ok(RelayState::Off),
            other => Err(AppError::InvalidInput(format!(
                "status must be 'on' or 'off', got '{other}'"
            ))),
        }
    }
}

/// Publishes device commands with QoS 1, never retained.
#[derive(Clone)]
pub struct DeviceCommands {
    client: AsyncClient,
    control_topic: String,
    reboot_topic: String,
}

impl DeviceCommands {
    // ---
    pub fn new(client: AsyncClient, control_topic: String, reboot_topic: String) -> Self {
        Self {
            client,
            control_topic,
            reboot_topic,
        }
    }

    /// Publish `{"status": "on" | "off"}` to the control topic.
    pub async fn relay(&self, state: RelayState) -> Result<()> {
        self.publish(&self.control_topic, json!({ "status": state }))
            .await
    }

    /// Publish `{"command": "reboot"}` to the reboot topic.
    pub async fn reboot(&self) -> Result<()> {
        self.publish(&self.reboot_topic, json!({ "command": "reboot" }))
            .await
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        // ---
        let body = payload.to_string();
        self.client
            .publish(topic, QoS::AtLeastOnce, false, body.clone().into_bytes())
            .await
            .map_err(|e| AppError::Mqtt(format!("publish to {topic} failed: {e}")))?;
        info!("MQTT published {} to {}", body, topic);
        Ok(())
    }
}

/// Run the listener until `shutdown` flips to `true`. The client is also
/// attached to `pipeline` for device commands.
pub fn spawn(
    settings: MqttSettings,
    pipeline: Arc<EnergyPipeline>,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    // ---
    let opts = build_options(&settings)?;
    let (client, eventloop) = AsyncClient::new(opts, 50);
    pipeline.attach_commands(DeviceCommands::new(
        client.clone(),
        settings.control_topic.clone(),
        settings.reboot_topic.clone(),
    ));
    Ok(tokio::spawn(listen(
        client, eventloop, settings, pipeline, shutdown,
    )))
}

async fn listen(
    client: AsyncClient,
    mut eventloop: EventLoop,
    settings: MqttSettings,
    pipeline: Arc<EnergyPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    // ---
    let qos = qos(settings.qos);
    info!("MQTT connecting to {}", settings.broker);

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    pipeline.set_mqtt_connected(true);
                    info!("MQTT connected, subscribing to {}", settings.topic);
                    if let Err(e) = client.subscribe(settings.topic.as_str(), qos).await {
                        warn!("MQTT subscribe to {} failed: {}", settings.topic, e);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    debug!(topic = %p.topic, bytes = p.payload.len(), "MQTT message");
                    pipeline.ingest_payload(&p.payload);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    pipeline.set_mqtt_connected(false);
                    warn!("MQTT broker sent disconnect");
                }
                Ok(_) => {}
                Err(e) => {
                    pipeline.set_mqtt_connected(false);
                    let err = AppError::Mqtt(e.to_string());
                    warn!("{}; retrying in {:?}", err, settings.reconnect_delay);
                    if wait_or_shutdown(settings.reconnect_delay, &mut shutdown).await {
                        break;
                    }
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!("MQTT disconnect: {}", e);
    }
    pipeline.set_mqtt_connected(false);
    info!("MQTT listener stopped");
}

/// Sleep for `delay` unless shutdown is signalled first. Returns `true` on
/// shutdown.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    // ---
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn addr(host: &str, port: u16, tls: bool) -> BrokerAddr {
        BrokerAddr {
            host: host.into(),
            port,
            tls,
        }
    }

    #[test]
    fn test_default_ports_by_scheme() {
        // ---
        assert_eq!(
            parse_broker_url("tcp://test.mosquitto.org").unwrap(),
            addr("test.mosquitto.org", 1883, false)
        );
        assert_eq!(
            parse_broker_url("mqtts://broker.local").unwrap(),
            addr("broker.local", 8883, true)
        );
        assert_eq!(
            parse_broker_url("broker.local").unwrap(),
            addr("broker.local", 1883, false)
        );
    }

    #[test]
    fn test_explicit_port_and_path() {
        // ---
        assert_eq!(
            parse_broker_url("ssl://10.0.0.5:8884/").unwrap(),
            addr("10.0.0.5", 8884, true)
        );
        assert_eq!(
            parse_broker_url("mqtt://localhost:1884").unwrap(),
            addr("localhost", 1884, false)
        );
    }

    #[test]
    fn test_bad_urls() {
        // ---
        assert!(parse_broker_url("ws://broker:80").is_err());
        assert!(parse_broker_url("tcp://broker:notaport").is_err());
        assert!(parse_broker_url("tcp://:1883").is_err());
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos(0), QoS::AtMostOnce);
        assert_eq!(qos(1), QoS::AtLeastOnce);
        assert_eq!(qos(2), QoS::ExactlyOnce);
    }

    #[test]
    fn test_options_use_unique_client_ids() {
        // ---
        let settings = MqttSettings {
            broker: "tcp://localhost".into(),
            username: Some("meter".into()),
            password: Some("secret".into()),
            topic: "iot/power".into(),
            control_topic: "iot/power/control".into(),
            reboot_topic: "iot/power/reboot".into(),
            qos: 1,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        };
        let a = build_options(&settings).unwrap();
        let b = build_options(&settings).unwrap();
        assert_ne!(a.client_id(), b.client_id());
        assert_eq!(a.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(a.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_relay_state_parsing() {
        // ---
        assert_eq!("on".parse::<RelayState>().unwrap(), RelayState::On);
        assert_eq!("off".parse::<RelayState>().unwrap(), RelayState::Off);
        assert!(matches!(
            "toggle".parse::<RelayState>(),
            Err(AppError::InvalidInput(_))
        ));
        assert!("ON".parse::<RelayState>().is_err());
        assert_eq!(json!({ "status": RelayState::Off }).to_string(), r#"{"status":"off"}"#);
    }

    fn offline_client() -> (DeviceCommands, EventLoop) {
        let opts = MqttOptions::new("powermeter-rollup-test", "localhost", 1883);
        let (client, eventloop) = AsyncClient::new(opts, 10);
        let commands = DeviceCommands::new(
            client,
            "iot/power/control".into(),
            "iot/power/reboot".into(),
        );
        (commands, eventloop)
    }

    #[tokio::test]
    async fn test_commands_queue_while_the_event_loop_lives() {
        // ---
        let (commands, eventloop) = offline_client();
        commands.relay(RelayState::On).await.unwrap();
        commands.reboot().await.unwrap();
        drop(eventloop);

        let err = commands.reboot().await.unwrap_err();
        assert!(matches!(err, AppError::Mqtt(ref m) if m.contains("iot/power/reboot")));
    }

    #[tokio::test]
    async fn test_reconnect_wait_ends_on_shutdown() {
        // ---
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            wait_or_shutdown(Duration::from_secs(3600), &mut rx).await
        });
        tx.send(true).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("reconnect wait did not observe shutdown")
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_reconnect_wait_elapses_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(Duration::from_millis(10), &mut rx).await);
    }
}
