use crate::config::{MonitorConfig, MqttConfig};
use crate::error::{AppError, Result};
use crate::protocol::{DeviceMeta, MonitorMessage};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

// Re-export types so the rest of the code can use these names
pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;

/// Lifecycle of the realtime stream as surfaced to the supervisor loop.
#[derive(Debug)]
pub enum StreamEvent {
    Data(MonitorMessage),
    Closed,
    Error(String),
}

/// Connection phase of the supervisor state machine. At most one reconnect
/// attempt is outstanding at a time; `Reconnecting` is only entered from
/// `Streaming` after a close/error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Connecting,
    Streaming,
    Reconnecting,
}

/// Fetch the monitor's device list, used to pre-populate the registry on
/// every successful connect.
pub async fn fetch_devices(
    client: &reqwest::Client,
    cfg: &MonitorConfig,
) -> Result<Vec<DeviceMeta>> {
    let mut req = client.get(&cfg.api_url);
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        req = req.basic_auth(u, Some(p));
    }
    let devices = req.send().await?.error_for_status()?.json().await?;
    Ok(devices)
}

pub fn build_options(cfg: &MqttConfig) -> MqttOptions {
    let client_id = format!("energy-push-{}", Uuid::new_v4());
    // Using v5::MqttOptions selects MQTT 5
    let mut opts = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(30)));
    opts.set_clean_start(cfg.clean_session.unwrap_or(true));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == 8883 {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

/// Dial the broker and subscribe to the realtime topic. Waits for the
/// broker's acknowledgement so a connect failure surfaces here, not as a
/// stream error.
pub async fn connect(cfg: &MqttConfig) -> Result<(AsyncClient, EventLoop)> {
    let (client, mut eventloop) = mqtt5::AsyncClient::new(build_options(cfg), 50);

    loop {
        match eventloop.poll().await {
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::ConnAck(ack))) => {
                if ack.code != mqtt5::mqttbytes::v5::ConnectReturnCode::Success {
                    return Err(AppError::Mqtt(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => return Err(AppError::Mqtt(e.to_string())),
        }
    }

    client
        .subscribe(cfg.topic.clone(), mqtt5::mqttbytes::QoS::AtLeastOnce)
        .await
        .map_err(|e| AppError::Mqtt(e.to_string()))?;

    Ok((client, eventloop))
}

/// Pump the event loop until something the scheduler cares about happens.
/// Undecodable publishes are skipped; they are not stream errors.
pub async fn next_event(eventloop: &mut EventLoop) -> StreamEvent {
    loop {
        match eventloop.poll().await {
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::Publish(publish))) => {
                match serde_json::from_slice::<MonitorMessage>(&publish.payload) {
                    Ok(msg) => return StreamEvent::Data(msg),
                    Err(e) => {
                        warn!(error = %e, "undecodable monitor message; skipping");
                        continue;
                    }
                }
            }
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::Disconnect(_))) => {
                return StreamEvent::Closed;
            }
            Ok(_) => continue,
            Err(e) => return StreamEvent::Error(e.to_string()),
        }
    }
}
