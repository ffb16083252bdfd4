//! Pushes unsynced inventory to the central control plane in the wire
//! format control-plane operators expect, then marks every device in
//! the batch synced once the POST succeeds.

use chrono::{DateTime, Utc};
use compliance_common::config::CentralConfig;
use compliance_common::domain::Device;
use compliance_store::Store;
use serde::Serialize;
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone)]
pub struct CentralClient {
    client: reqwest::Client,
    url: String,
    site_id: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct DevicePayload {
    id: uuid::Uuid,
    ip: std::net::IpAddr,
    hostname: Option<String>,
    device_type: compliance_common::domain::DeviceType,
    status: compliance_common::domain::LifecycleStatus,
    compliance_status: compliance_common::domain::ComplianceStatus,
    medical_device: bool,
    open_ports: Vec<u16>,
    compliance_details: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ReplicationPayload {
    appliance_id: String,
    site_id: String,
    scan_timestamp: DateTime<Utc>,
    devices: Vec<DevicePayload>,
    total_devices: usize,
    monitored_devices: usize,
    excluded_devices: usize,
    medical_devices: usize,
    compliance_rate: f64,
}

impl CentralClient {
    /// `None` when no central target is configured — replication is
    /// then simply skipped rather than treated as an error.
    pub fn from_config(config: &CentralConfig) -> Option<Self> {
        let url = config.url.clone()?;
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build().ok()?;
        Some(Self { client, url, site_id: config.site_id.clone().unwrap_or_default(), api_key: config.api_key.clone() })
    }

    pub async fn replicate_unsynced(&self, store: &Store) -> OrchestratorResult<usize> {
        let unsynced = store.list_unsynced_devices()?;
        if unsynced.is_empty() {
            return Ok(0);
        }

        let all_devices = store.list_devices(None, None, usize::MAX, 0)?;
        let payload = self.build_payload(store, &unsynced, &all_devices)?;
        let count = unsynced.len();

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(OrchestratorError::Transport(response.error_for_status().unwrap_err()));
        }

        for device in &unsynced {
            store.mark_synced(device.id)?;
        }

        Ok(count)
    }

    fn build_payload(&self, store: &Store, unsynced: &[Device], all_devices: &[Device]) -> OrchestratorResult<ReplicationPayload> {
        let mut devices = Vec::with_capacity(unsynced.len());
        for device in unsynced {
            let ports = store.get_ports(device.id)?;
            let compliance = store.latest_compliance_results(device.id)?;
            devices.push(DevicePayload {
                id: device.id,
                ip: device.ip,
                hostname: device.hostname.clone(),
                device_type: device.device_type,
                status: device.status,
                compliance_status: device.compliance_status,
                medical_device: device.medical_device,
                open_ports: ports.iter().map(|p| p.port).collect(),
                compliance_details: serde_json::to_value(&compliance).unwrap_or(serde_json::Value::Null),
            });
        }

        let monitored = all_devices.iter().filter(|d| d.status == compliance_common::domain::LifecycleStatus::Monitored).count();
        let excluded = all_devices.iter().filter(|d| d.scan_policy == compliance_common::domain::ScanPolicy::Excluded).count();
        let medical = all_devices.iter().filter(|d| d.medical_device).count();
        let compliant = all_devices.iter().filter(|d| d.compliance_status == compliance_common::domain::ComplianceStatus::Compliant).count();
        let compliance_rate = if all_devices.is_empty() { 0.0 } else { compliant as f64 / all_devices.len() as f64 };

        Ok(ReplicationPayload {
            appliance_id: self.site_id.clone(),
            site_id: self.site_id.clone(),
            scan_timestamp: Utc::now(),
            devices,
            total_devices: all_devices.len(),
            monitored_devices: monitored,
            excluded_devices: excluded,
            medical_devices: medical,
            compliance_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_is_none_without_url() {
        let config = CentralConfig::default();
        assert!(CentralClient::from_config(&config).is_none());
    }

    #[test]
    fn from_config_builds_a_client_when_url_set() {
        let config = CentralConfig { url: Some("https://central.example/api/replicate".into()), site_id: Some("clinic-01".into()), api_key: None };
        assert!(CentralClient::from_config(&config).is_some());
    }
}
