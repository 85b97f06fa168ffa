use crate::config::HubConfig;
use crate::error::Result;
use crate::protocol::PushPayload;
use tracing::{debug, error};

/// Header naming the originator of each push, for the hub's event router.
pub const SOURCE_HEADER: &str = "source";
pub const SOURCE_NAME: &str = "energy-push";

/// Outbound seam the scheduler hands snapshots to.
///
/// `deliver` must not block batch processing; implementations ship the
/// payload in the background and surface the result through logging only.
pub trait PushSink {
    fn deliver(&self, payload: PushPayload);
}

/// Delivers pushes to the hub's event endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HubClient {
    pub fn new(cfg: &HubConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(HubClient {
            client,
            endpoint: cfg.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PushSink for HubClient {
    /// Fire-and-forget POST of the device snapshot.
    ///
    /// Failures are logged and nothing else: no retry, no queueing, and the
    /// scheduler's push timer is not informed. A push that never lands still
    /// counts against the min/max interval policy.
    fn deliver(&self, payload: PushPayload) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            let device_count = payload.devices.len();
            let result = client
                .post(&endpoint)
                .header(SOURCE_HEADER, SOURCE_NAME)
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(endpoint = %endpoint, devices = device_count, "push delivered to hub");
                }
                Ok(resp) => {
                    error!(
                        endpoint = %endpoint,
                        status = %resp.status(),
                        "hub rejected push"
                    );
                }
                Err(e) => {
                    error!(endpoint = %endpoint, error = %e, "failed to deliver push to hub");
                }
            }
        });
    }
}
