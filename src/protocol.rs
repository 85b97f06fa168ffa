use serde::{Deserialize, Serialize};

use crate::registry::DeviceState;

/// Messages published by the energy monitor on its realtime topic.
///
/// Only `realtime_update` carries samples; every other message type is
/// tolerated and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorMessage {
    RealtimeUpdate {
        #[serde(default)]
        payload: Option<RealtimePayload>,
    },
    #[serde(other)]
    Unsupported,
}

impl MonitorMessage {
    pub fn realtime(devices: Vec<Sample>) -> Self {
        MonitorMessage::RealtimeUpdate {
            payload: Some(RealtimePayload { devices }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimePayload {
    #[serde(default)]
    pub devices: Vec<Sample>,
}

/// One per-device reading inside a realtime batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_is_guessed: bool,
    pub watts: f64,
}

impl Sample {
    pub fn new(id: impl Into<String>, name: impl Into<String>, watts: f64) -> Self {
        Sample {
            id: id.into(),
            name: name.into(),
            name_is_guessed: false,
            watts,
        }
    }
}

/// One entry of the monitor's device-list endpoint, fetched once per connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_is_guessed: bool,
}

/// One device entry of an outbound push.
///
/// The hub only requires id/name/state/usage; the bookkeeping flags are
/// included when present (the synthetic total carries none).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub state: DeviceState,
    pub usage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recently_changed: Option<bool>,
}

/// Body of one POST to the hub endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub devices: Vec<DeviceRecord>,
}
