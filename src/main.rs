use energy_push::config::Config;
use energy_push::hub::HubClient;
use energy_push::monitor::{self, StreamEvent, StreamPhase};
use energy_push::registry::DeviceRegistry;
use energy_push::scheduler::{PushPolicy, UpdateScheduler};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        monitor = %cfg.monitor.mqtt.host,
        topic = %cfg.monitor.mqtt.topic,
        hub = %cfg.hub.endpoint,
        "loaded config"
    );

    let http = reqwest::Client::new();
    let hub = HubClient::new(&cfg.hub)?;
    let mut scheduler = UpdateScheduler::new(
        DeviceRegistry::new(),
        PushPolicy::from(&cfg.push),
        hub,
    );

    let sig = tokio::signal::ctrl_c();
    tokio::pin!(sig);

    let mut phase = StreamPhase::Connecting;
    let mut reconnect_pending = false;
    let mut stream = None;

    loop {
        match phase {
            StreamPhase::Connecting | StreamPhase::Reconnecting => {
                match monitor::connect(&cfg.monitor.mqtt).await {
                    Ok(conn) => {
                        reconnect_pending = false;
                        match monitor::fetch_devices(&http, &cfg.monitor).await {
                            Ok(devices) => {
                                info!(devices = devices.len(), "connected to monitor; data incoming");
                                scheduler.add_devices(&devices);
                            }
                            Err(e) => {
                                warn!(error = %e, "device list fetch failed; continuing with stream only");
                            }
                        }
                        stream = Some(conn);
                        phase = StreamPhase::Streaming;
                    }
                    Err(e) => {
                        // No retry loop for connect failures; only a live
                        // stream's close/error triggers a reconnect.
                        error!(error = %e, "monitor connection failed; idling until shutdown");
                        let _ = (&mut sig).await;
                        break;
                    }
                }
            }
            StreamPhase::Streaming => {
                let event = match stream.as_mut() {
                    Some((_client, eventloop)) => tokio::select! {
                        biased;
                        _ = &mut sig => None,
                        ev = monitor::next_event(eventloop) => Some(ev),
                    },
                    None => {
                        phase = StreamPhase::Connecting;
                        continue;
                    }
                };

                let Some(event) = event else {
                    info!("shutdown requested");
                    break;
                };

                let stream_down = match event {
                    StreamEvent::Data(msg) => {
                        scheduler.process_message(msg);
                        false
                    }
                    StreamEvent::Closed => {
                        warn!("monitor stream closed");
                        true
                    }
                    StreamEvent::Error(e) => {
                        warn!(error = %e, "monitor stream error");
                        true
                    }
                };

                if stream_down {
                    // Detach from the dead stream before re-dialing
                    stream = None;
                    if cfg.monitor.auto_reconnect && !reconnect_pending {
                        reconnect_pending = true;
                        info!("reconnecting to monitor");
                        phase = StreamPhase::Reconnecting;
                    } else {
                        warn!("reconnect disabled or already pending; idling until shutdown");
                        let _ = (&mut sig).await;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
