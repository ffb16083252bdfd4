//! Agent check-in registry.
//!
//! Grounded on `go_agent.py`'s `GoAgentRegistry`: a TTL'd map of
//! recently-seen endpoints, refreshed by HTTP POSTs the Orchestrator's
//! `axum` router forwards into `AgentRegistry::checkin`. `discover`
//! just snapshots the non-stale set; the HTTP handler itself lives in
//! `compliance-orchestrator` since it owns the router.

use chrono::{DateTime, Utc};
use compliance_common::domain::{DiscoveredDevice, Origin};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;

use crate::{DiscoveryMethod, DiscoveryResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AgentCheckin {
    pub host_id: String,
    pub hostname: String,
    pub ip_address: Option<std::net::IpAddr>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
}

#[derive(Debug, Clone)]
struct AgentEntry {
    checkin: AgentCheckin,
    last_seen: DateTime<Utc>,
}

/// Shared, cheap-to-clone registry of checked-in agents.
#[derive(Clone)]
pub struct AgentRegistry {
    entries: Arc<DashMap<String, AgentEntry>>,
    stale_after: chrono::Duration,
}

impl AgentRegistry {
    pub fn new(stale_timeout_seconds: i64) -> Self {
        Self { entries: Arc::new(DashMap::new()), stale_after: chrono::Duration::seconds(stale_timeout_seconds) }
    }

    pub fn checkin(&self, checkin: AgentCheckin) {
        self.entries.insert(checkin.host_id.clone(), AgentEntry { checkin, last_seen: Utc::now() });
    }

    pub fn active(&self) -> Vec<AgentCheckin> {
        let cutoff = Utc::now() - self.stale_after;
        self.entries.iter().filter(|e| e.last_seen >= cutoff).map(|e| e.checkin.clone()).collect()
    }

    pub fn cleanup_stale(&self) -> usize {
        let cutoff = Utc::now() - self.stale_after;
        let stale: Vec<String> = self.entries.iter().filter(|e| e.last_seen < cutoff).map(|e| e.key().clone()).collect();
        for host_id in &stale {
            self.entries.remove(host_id);
        }
        stale.len()
    }
}

pub struct AgentCheckinMethod {
    registry: AgentRegistry,
}

impl AgentCheckinMethod {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl DiscoveryMethod for AgentCheckinMethod {
    fn name(&self) -> &str {
        "agent"
    }

    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
        let devices = self
            .registry
            .active()
            .into_iter()
            .filter_map(|checkin| {
                let ip = checkin.ip_address?;
                let mut device = DiscoveredDevice::new(ip, Origin::Agent);
                device.hostname = Some(checkin.hostname);
                device.os = checkin.os_name;
                if let Some(version) = checkin.os_version {
                    device.os = device.os.map(|os| format!("{os} {version}"));
                }
                Some(device)
            })
            .collect();
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn checkin(host_id: &str) -> AgentCheckin {
        AgentCheckin {
            host_id: host_id.into(),
            hostname: "ws-01".into(),
            ip_address: Some(std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))),
            os_name: Some("Windows".into()),
            os_version: Some("10".into()),
        }
    }

    #[test]
    fn active_excludes_stale_entries() {
        let registry = AgentRegistry::new(0);
        registry.checkin(checkin("host-a"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(registry.active().is_empty());
    }

    #[test]
    fn active_includes_fresh_entries() {
        let registry = AgentRegistry::new(300);
        registry.checkin(checkin("host-a"));
        assert_eq!(registry.active().len(), 1);
    }

    #[tokio::test]
    async fn discover_skips_entries_without_ip() {
        let registry = AgentRegistry::new(300);
        let mut c = checkin("host-a");
        c.ip_address = None;
        registry.checkin(c);
        let method = AgentCheckinMethod::new(registry);
        let devices = method.discover().await.unwrap();
        assert!(devices.is_empty());
    }
}
