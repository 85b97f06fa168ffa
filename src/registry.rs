use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::protocol::{DeviceRecord, Sample};

/// Id and name of the synthetic aggregate record appended to every snapshot.
pub const TOTAL_USAGE_ID: &str = "TotalUsage";

/// On/off state of a tracked device. `Unknown` only exists before the first
/// observed sample; a device never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Unknown,
    On,
    Off,
}

/// Last-known state of one power-metered device.
///
/// `usage` is `None` until the device's first observed sample; while on it is
/// floored at 1 W (a literal 0 would be indistinguishable from off), while off
/// it is 0.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub state: DeviceState,
    pub usage: Option<f64>,
    pub currently_on: bool,
    pub recently_changed: bool,
}

impl Device {
    fn new(id: &str, name: &str, name_is_guessed: bool) -> Self {
        let name = if name_is_guessed {
            format!("{} (?)", name)
        } else {
            name.to_string()
        };
        Device {
            id: id.to_string(),
            name,
            state: DeviceState::Unknown,
            usage: None,
            currently_on: false,
            recently_changed: true,
        }
    }
}

/// What applying one sample did to the device.
#[derive(Debug, Clone, Copy)]
pub struct SampleOutcome {
    /// The sample moved the device from `Off` to `On`. A first-ever sample
    /// (`Unknown` to `On`) does not count.
    pub turned_on: bool,
    /// Raw incoming watts minus the previously stored usage; `None` until the
    /// device has a prior real observation.
    pub usage_delta: Option<f64>,
}

/// A device inferred off by absence from the current batch.
#[derive(Debug, Clone)]
pub struct TurnOff {
    pub id: String,
    pub name: String,
}

/// In-memory map of device id to last-known state.
///
/// Owned and mutated exclusively by the update scheduler's fold sequence;
/// devices are created lazily and never removed. The registry reports
/// transitions and leaves significance policy to its caller.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Insert a device if absent; a no-op for devices already tracked.
    pub fn upsert(&mut self, id: &str, name: &str, name_is_guessed: bool) {
        self.devices
            .entry(id.to_string())
            .or_insert_with(|| Device::new(id, name, name_is_guessed));
    }

    /// Start a batch fold: nothing has been seen yet, and `recently_changed`
    /// survives only for entries still waiting on their first observation.
    pub fn begin_batch(&mut self) {
        for dev in self.devices.values_mut() {
            dev.currently_on = false;
            if dev.usage.is_some() {
                dev.recently_changed = false;
            }
        }
    }

    /// Fold one sample into the registry, implicitly creating the device.
    ///
    /// The returned delta is raw incoming watts against the stored (clamped)
    /// usage; the stored value is the clamped one. That order is load-bearing
    /// for threshold comparisons.
    pub fn apply_sample(&mut self, sample: &Sample) -> SampleOutcome {
        let dev = self
            .devices
            .entry(sample.id.clone())
            .or_insert_with(|| Device::new(&sample.id, &sample.name, sample.name_is_guessed));

        let usage_delta = dev.usage.map(|prev| sample.watts - prev);
        let turned_on = dev.state == DeviceState::Off;

        dev.state = DeviceState::On;
        dev.usage = Some(sample.watts.max(1.0));
        dev.currently_on = true;
        if turned_on {
            dev.recently_changed = true;
        }

        SampleOutcome {
            turned_on,
            usage_delta,
        }
    }

    /// Close a batch fold: every device not seen in the batch is inferred off.
    /// Returns the devices that actually transitioned `On` to `Off`.
    pub fn end_batch(&mut self) -> Vec<TurnOff> {
        let mut turned_off = Vec::new();
        for dev in self.devices.values_mut() {
            if dev.currently_on {
                continue;
            }
            if dev.state == DeviceState::On {
                dev.recently_changed = true;
                turned_off.push(TurnOff {
                    id: dev.id.clone(),
                    name: dev.name.clone(),
                });
            }
            dev.state = DeviceState::Off;
            dev.usage = Some(0.0);
        }
        turned_off
    }

    /// Full device list in stable id order, with the recomputed `TotalUsage`
    /// aggregate appended.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut total = 0.0;
        let mut records: Vec<DeviceRecord> = Vec::with_capacity(self.devices.len() + 1);

        for dev in self.devices.values() {
            let usage = dev.usage.unwrap_or(0.0);
            total += usage;
            records.push(DeviceRecord {
                id: dev.id.clone(),
                name: dev.name.clone(),
                state: dev.state,
                usage,
                currently_on: Some(dev.currently_on),
                recently_changed: Some(dev.recently_changed),
            });
        }

        records.push(DeviceRecord {
            id: TOTAL_USAGE_ID.to_string(),
            name: TOTAL_USAGE_ID.to_string(),
            state: DeviceState::On,
            usage: total,
            currently_on: None,
            recently_changed: None,
        });

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(id: &str, name: &str, watts: f64) -> Sample {
        Sample::new(id, name, watts)
    }

    #[test]
    fn test_upsert_is_noop_when_present() {
        let mut reg = DeviceRegistry::new();
        reg.upsert("dev-1", "Lamp", false);
        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Lamp", 50.0));
        reg.upsert("dev-1", "Renamed", false);

        let dev = reg.get("dev-1").unwrap();
        assert_eq!(dev.name, "Lamp");
        assert_eq!(dev.state, DeviceState::On);
        assert_eq!(dev.usage, Some(50.0));
    }

    #[test]
    fn test_guessed_name_gets_marker() {
        let mut reg = DeviceRegistry::new();
        reg.upsert("dev-1", "Maybe Dryer", true);
        assert_eq!(reg.get("dev-1").unwrap().name, "Maybe Dryer (?)");
    }

    #[test]
    fn test_first_sample_creates_device_on() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        let outcome = reg.apply_sample(&sample("dev-1", "Lamp", 50.0));
        reg.end_batch();

        assert!(!outcome.turned_on, "unknown -> on is not a turn-on");
        assert!(outcome.usage_delta.is_none());
        let dev = reg.get("dev-1").unwrap();
        assert_eq!(dev.state, DeviceState::On);
        assert_eq!(dev.usage, Some(50.0));
        assert!(dev.recently_changed);
    }

    #[test]
    fn test_usage_floored_at_one_watt_while_on() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Standby", 0.0));
        assert_eq!(reg.get("dev-1").unwrap().usage, Some(1.0));

        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Standby", 0.4));
        assert_eq!(reg.get("dev-1").unwrap().usage, Some(1.0));
    }

    #[test]
    fn test_delta_is_raw_watts_against_stored_clamped_usage() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Standby", 0.2));
        reg.end_batch();

        // Stored usage was clamped to 1.0; the next delta is raw vs stored.
        reg.begin_batch();
        let outcome = reg.apply_sample(&sample("dev-1", "Standby", 0.8));
        assert_eq!(outcome.usage_delta, Some(0.8 - 1.0));
    }

    #[test]
    fn test_absent_on_device_turns_off() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Lamp", 50.0));
        reg.end_batch();

        reg.begin_batch();
        reg.apply_sample(&sample("dev-2", "Fridge", 120.0));
        let turned_off = reg.end_batch();

        assert_eq!(turned_off.len(), 1);
        assert_eq!(turned_off[0].id, "dev-1");
        let dev = reg.get("dev-1").unwrap();
        assert_eq!(dev.state, DeviceState::Off);
        assert_eq!(dev.usage, Some(0.0));
        assert!(dev.recently_changed);
    }

    #[test]
    fn test_absent_unknown_device_becomes_off_silently() {
        let mut reg = DeviceRegistry::new();
        reg.upsert("dev-1", "Lamp", false);

        reg.begin_batch();
        reg.apply_sample(&sample("dev-2", "Fridge", 120.0));
        let turned_off = reg.end_batch();

        assert!(turned_off.is_empty(), "unknown -> off is not a transition");
        let dev = reg.get("dev-1").unwrap();
        assert_eq!(dev.state, DeviceState::Off);
        assert_eq!(dev.usage, Some(0.0));
    }

    #[test]
    fn test_device_is_never_removed() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Lamp", 50.0));
        reg.end_batch();

        for _ in 0..3 {
            reg.begin_batch();
            reg.apply_sample(&sample("dev-2", "Fridge", 120.0));
            reg.end_batch();
        }

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get("dev-1").unwrap().state, DeviceState::Off);
    }

    #[test]
    fn test_reappearing_device_turns_back_on() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Lamp", 50.0));
        reg.end_batch();

        reg.begin_batch();
        reg.apply_sample(&sample("dev-2", "Fridge", 120.0));
        reg.end_batch();

        reg.begin_batch();
        let outcome = reg.apply_sample(&sample("dev-1", "Lamp", 60.0));
        assert!(outcome.turned_on);
        // Prior stored usage was the off-value 0.0, a real observation.
        assert_eq!(outcome.usage_delta, Some(60.0));
        assert_eq!(reg.get("dev-1").unwrap().state, DeviceState::On);
    }

    #[test]
    fn test_recently_changed_lifecycle() {
        let mut reg = DeviceRegistry::new();
        reg.upsert("dev-1", "Lamp", false);
        assert!(reg.get("dev-1").unwrap().recently_changed);

        // Still unobserved: the initial-load flag survives begin_batch.
        reg.begin_batch();
        assert!(reg.get("dev-1").unwrap().recently_changed);
        reg.apply_sample(&sample("dev-1", "Lamp", 50.0));
        reg.end_batch();

        // Observed and steady: the flag clears on the next batch.
        reg.begin_batch();
        assert!(!reg.get("dev-1").unwrap().recently_changed);
        reg.apply_sample(&sample("dev-1", "Lamp", 55.0));
        reg.end_batch();
        assert!(!reg.get("dev-1").unwrap().recently_changed);
    }

    #[test]
    fn test_snapshot_appends_total_in_stable_order() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        reg.apply_sample(&sample("b-dev", "Fridge", 120.0));
        reg.apply_sample(&sample("a-dev", "Lamp", 50.0));
        reg.end_batch();

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].id, "a-dev");
        assert_eq!(snapshot[1].id, "b-dev");
        assert_eq!(snapshot[2].id, TOTAL_USAGE_ID);
        assert_eq!(snapshot[2].usage, 170.0);
        assert_eq!(snapshot[2].state, DeviceState::On);
        assert!(snapshot[2].currently_on.is_none());
        assert_eq!(snapshot[0].currently_on, Some(true));
    }

    #[test]
    fn test_snapshot_total_includes_off_devices_as_zero() {
        let mut reg = DeviceRegistry::new();
        reg.begin_batch();
        reg.apply_sample(&sample("dev-1", "Lamp", 50.0));
        reg.end_batch();

        reg.begin_batch();
        reg.apply_sample(&sample("dev-2", "Fridge", 120.0));
        reg.end_batch();

        let snapshot = reg.snapshot();
        let total = snapshot.last().unwrap();
        assert_eq!(total.usage, 120.0);
    }
}
