//! Discovery Fabric: pluggable capability methods plus the merge-by-IP
//! step that turns their unioned output into one record per host.

pub mod agent;
pub mod directory;
mod error;
pub mod neighbor;
pub mod portscan;

pub use error::{DiscoveryError, DiscoveryResult};

use compliance_common::domain::DiscoveredDevice;
use std::collections::HashMap;
use std::net::IpAddr;

/// A pluggable discovery capability. Implementations are expected to
/// be cheap to hold as `Box<dyn DiscoveryMethod>` in the Orchestrator's
/// enabled-methods list; `discover` does the expensive work per call.
#[async_trait::async_trait]
pub trait DiscoveryMethod: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool {
        true
    }

    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>>;
}

/// Union discovery results from every enabled method and merge by IP,
/// preferring the most information-rich record field-by-field.
pub fn merge_by_ip(batches: Vec<Vec<DiscoveredDevice>>) -> Vec<DiscoveredDevice> {
    let mut merged: HashMap<IpAddr, DiscoveredDevice> = HashMap::new();
    for batch in batches {
        for device in batch {
            merged
                .entry(device.ip)
                .and_modify(|existing| existing.merge(&device))
                .or_insert(device);
        }
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_common::domain::Origin;
    use std::net::Ipv4Addr;

    #[test]
    fn merge_by_ip_unions_ports_and_prefers_non_empty_fields() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let mut a = DiscoveredDevice::new(ip, Origin::Neighbor);
        a.mac = Some("aa:bb:cc:dd:ee:ff".into());
        a.open_ports = vec![22];

        let mut b = DiscoveredDevice::new(ip, Origin::Portscan);
        b.hostname = Some("host-01".into());
        b.open_ports = vec![22, 443];

        let merged = merge_by_ip(vec![vec![a], vec![b]]);
        assert_eq!(merged.len(), 1);
        let device = &merged[0];
        assert_eq!(device.hostname.as_deref(), Some("host-01"));
        assert_eq!(device.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(device.open_ports.len(), 2);
        assert!(device.sources.contains(&Origin::Neighbor));
        assert!(device.sources.contains(&Origin::Portscan));
    }
}
