pub mod config;
pub mod error;
pub mod hub;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod scheduler;

// Re-export commonly used items
pub use config::Config;
pub use error::{AppError, Result};
pub use hub::{HubClient, PushSink};
pub use protocol::{DeviceMeta, MonitorMessage, PushPayload, Sample};
pub use registry::{DeviceRegistry, DeviceState};
pub use scheduler::{PushPolicy, UpdateScheduler};
