use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::PushConfig;
use crate::hub::PushSink;
use crate::protocol::{DeviceMeta, MonitorMessage, PushPayload, Sample};
use crate::registry::DeviceRegistry;

/// Catch-all bucket some monitors emit for unattributed load. It contributes
/// to the aggregate total and is delivered like any device, but never forces
/// a push by itself.
pub const OTHER_DEVICE_NAME: &str = "Other";

/// Push policy constants, lifted out of [`PushConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PushPolicy {
    pub usage_threshold: f64,
    pub max_interval_secs: u64,
    pub min_interval_secs: u64,
}

impl From<&PushConfig> for PushPolicy {
    fn from(cfg: &PushConfig) -> Self {
        PushPolicy {
            usage_threshold: cfg.usage_threshold,
            max_interval_secs: cfg.max_interval_secs,
            min_interval_secs: cfg.min_interval_secs,
        }
    }
}

/// Folds incoming batches into the device registry and decides, once per
/// batch, whether the hub gets a push.
///
/// A push happens when a significant change survived the debounce floor, or
/// unconditionally once the maximum quiet interval has elapsed. The push
/// timer advances at send time and is never rolled back: a failed delivery
/// still counts against the interval policy.
pub struct UpdateScheduler<S> {
    registry: DeviceRegistry,
    policy: PushPolicy,
    sink: S,
    last_push_at: Option<DateTime<Utc>>,
}

impl<S: PushSink> UpdateScheduler<S> {
    pub fn new(registry: DeviceRegistry, policy: PushPolicy, sink: S) -> Self {
        UpdateScheduler {
            registry,
            policy,
            sink,
            last_push_at: None,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn last_push_at(&self) -> Option<DateTime<Utc>> {
        self.last_push_at
    }

    /// Pre-populate the registry from the monitor's device list.
    pub fn add_devices(&mut self, devices: &[DeviceMeta]) {
        for dev in devices {
            self.registry.upsert(&dev.id, &dev.name, dev.name_is_guessed);
        }
    }

    /// Handle one monitor message. Anything but a realtime update with a
    /// non-empty device list is a no-op. Returns whether a push was sent.
    pub fn process_message(&mut self, msg: MonitorMessage) -> bool {
        match msg {
            MonitorMessage::RealtimeUpdate {
                payload: Some(payload),
            } if !payload.devices.is_empty() => self.process_batch(&payload.devices),
            other => {
                debug!(?other, "ignoring monitor message without samples");
                false
            }
        }
    }

    pub fn process_batch(&mut self, samples: &[Sample]) -> bool {
        self.process_batch_at(samples, Utc::now())
    }

    /// Fold one batch at an explicit instant. Time is a parameter so the
    /// interval rules are testable with synthetic batches.
    pub fn process_batch_at(&mut self, samples: &[Sample], now: DateTime<Utc>) -> bool {
        let mut update_now = false;

        self.registry.begin_batch();

        for sample in samples {
            let outcome = self.registry.apply_sample(sample);
            if sample.name == OTHER_DEVICE_NAME {
                continue;
            }
            if outcome.turned_on {
                info!(device = %sample.name, "device turned on");
                update_now = true;
            }
            if let Some(delta) = outcome.usage_delta {
                if delta.abs() > self.policy.usage_threshold {
                    info!(device = %sample.name, delta, "device usage changed");
                    update_now = true;
                }
            }
        }

        for off in self.registry.end_batch() {
            if off.name == OTHER_DEVICE_NAME {
                continue;
            }
            info!(device = %off.name, "device turned off");
            update_now = true;
        }

        let elapsed = self.seconds_since_last_push(now);

        // The debounce floor wins over significance
        if elapsed <= self.policy.min_interval_secs as f64 {
            update_now = false;
        }

        if update_now || elapsed >= self.policy.max_interval_secs as f64 {
            let payload = PushPayload {
                devices: self.registry.snapshot(),
            };
            debug!(
                devices = payload.devices.len(),
                forced = !update_now,
                "pushing snapshot to hub"
            );
            self.last_push_at = Some(now);
            self.sink.deliver(payload);
            return true;
        }

        false
    }

    fn seconds_since_last_push(&self, now: DateTime<Utc>) -> f64 {
        match self.last_push_at {
            Some(last) => (now - last).num_milliseconds() as f64 / 1000.0,
            None => f64::INFINITY,
        }
    }
}
