//! Local OS neighbor-table (ARP/NDP) discovery.
//!
//! Grounded on `original_source/.../discovery/arp_discovery.py`'s
//! line-parsing approach and OUI lookup, adapted to `ip neighbor show`
//! (the modern Linux neighbor cache, superset of `arp -an`). No
//! privileges required — this only reads existing kernel state.

use compliance_common::domain::{DiscoveredDevice, Origin};
use regex::Regex;
use std::net::IpAddr;

use crate::{DiscoveryError, DiscoveryMethod, DiscoveryResult};

const OUI_MAP: &[(&str, &str)] = &[
    ("00:50:56", "VMware"),
    ("00:0c:29", "VMware"),
    ("00:1c:42", "Parallels"),
    ("08:00:27", "VirtualBox"),
    ("52:54:00", "QEMU/KVM"),
    ("00:15:5d", "Microsoft Hyper-V"),
    ("ac:de:48", "Dell"),
    ("d4:be:d9", "Dell"),
    ("00:1e:67", "HP"),
    ("3c:d9:2b", "HP"),
    ("00:1a:a0", "Lenovo"),
    ("78:dd:12", "Lenovo"),
    ("f0:9f:c2", "Apple"),
    ("3c:22:fb", "Apple"),
    ("00:1b:63", "Cisco"),
    ("00:26:cb", "Cisco"),
];

fn lookup_oui(mac: &str) -> Option<&'static str> {
    let prefix = mac.to_ascii_lowercase();
    let prefix = prefix.get(0..8)?;
    OUI_MAP.iter().find(|(p, _)| *p == prefix).map(|(_, vendor)| *vendor)
}

/// Parses `ip neighbor show` lines of the form:
/// `10.0.0.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
fn parse_neighbor_line(line: &str, ip_pattern: &Regex, mac_pattern: &Regex) -> Option<DiscoveredDevice> {
    let ip_str = ip_pattern.find(line)?.as_str();
    let ip: IpAddr = ip_str.parse().ok()?;
    let mac = mac_pattern.find(line).map(|m| m.as_str().to_lowercase());

    if line.contains("FAILED") || line.contains("INCOMPLETE") {
        return None;
    }

    let mut device = DiscoveredDevice::new(ip, Origin::Neighbor);
    if let Some(mac) = mac {
        device.vendor = lookup_oui(&mac).map(String::from);
        device.mac = Some(mac);
    }
    Some(device)
}

pub struct NeighborTable;

impl NeighborTable {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DiscoveryMethod for NeighborTable {
    fn name(&self) -> &str {
        "neighbor"
    }

    async fn is_available(&self) -> bool {
        tokio::process::Command::new("ip").arg("-V").output().await.is_ok()
    }

    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
        let output = tokio::process::Command::new("ip")
            .args(["neighbor", "show"])
            .output()
            .await
            .map_err(|e| DiscoveryError::Neighbor(e.to_string()))?;

        if !output.status.success() {
            return Err(DiscoveryError::Neighbor(String::from_utf8_lossy(&output.stderr).to_string()));
        }

        let ip_pattern = Regex::new(r"^\S+").unwrap();
        let mac_pattern = Regex::new(r"(?:[0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}").unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let devices = stdout.lines().filter_map(|line| parse_neighbor_line(line, &ip_pattern, &mac_pattern)).collect();
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reachable_entry_with_vendor() {
        let ip_pattern = Regex::new(r"^\S+").unwrap();
        let mac_pattern = Regex::new(r"(?:[0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}").unwrap();
        let line = "10.0.0.5 dev eth0 lladdr 00:50:56:aa:bb:cc REACHABLE";
        let device = parse_neighbor_line(line, &ip_pattern, &mac_pattern).unwrap();
        assert_eq!(device.mac.as_deref(), Some("00:50:56:aa:bb:cc"));
        assert_eq!(device.vendor.as_deref(), Some("VMware"));
    }

    #[test]
    fn skips_failed_entries() {
        let ip_pattern = Regex::new(r"^\S+").unwrap();
        let mac_pattern = Regex::new(r"(?:[0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}").unwrap();
        let line = "10.0.0.9 dev eth0 FAILED";
        assert!(parse_neighbor_line(line, &ip_pattern, &mac_pattern).is_none());
    }
}
