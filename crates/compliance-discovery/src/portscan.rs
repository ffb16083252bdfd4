//! Bounded-concurrency TCP connect scan.
//!
//! Grounded on `nmap_discovery.py`'s field shape (open ports, service
//! guesses, per-host timeout, bounded concurrency) but reimplemented
//! as a native `tokio` connect scan rather than shelling to `nmap` —
//! the teacher workspace never shells to external binaries for its
//! core data plane, and a TCP connect scan needs no raw sockets or
//! elevated privileges.

use compliance_common::domain::{DiscoveredDevice, Origin};
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::{DiscoveryError, DiscoveryMethod, DiscoveryResult};

/// Common service ports probed on every host, paired with a banner
/// guess when no banner is read back (connect-scan only, no -sV).
const WELL_KNOWN_PORTS: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "dns"),
    (69, "tftp"),
    (80, "http"),
    (88, "kerberos"),
    (104, "dicom"),
    (110, "pop3"),
    (143, "imap"),
    (161, "snmp"),
    (162, "snmptrap"),
    (389, "ldap"),
    (443, "https"),
    (445, "smb"),
    (512, "rexec"),
    (513, "rlogin"),
    (514, "rsh"),
    (515, "lpd"),
    (631, "ipp"),
    (636, "ldaps"),
    (1433, "mssql"),
    (1521, "oracle"),
    (2575, "hl7"),
    (3268, "global-catalog"),
    (3269, "global-catalog-ssl"),
    (3306, "mysql"),
    (3389, "rdp"),
    (5432, "postgresql"),
    (5985, "winrm"),
    (5986, "winrm-https"),
    (6379, "redis"),
    (8080, "http-alt"),
    (8443, "https-alt"),
    (9100, "jetdirect"),
    (11112, "dicom-alt"),
    (27017, "mongodb"),
];

pub struct ActivePortscan {
    pub network_ranges: Vec<String>,
    pub max_concurrent: usize,
    pub host_timeout: Duration,
}

impl ActivePortscan {
    pub fn new(network_ranges: Vec<String>, max_concurrent: usize, host_timeout_seconds: u64) -> Self {
        Self { network_ranges, max_concurrent, host_timeout: Duration::from_secs(host_timeout_seconds) }
    }

    fn hosts(&self) -> DiscoveryResult<Vec<IpAddr>> {
        let mut hosts = Vec::new();
        for range in &self.network_ranges {
            let network: IpNetwork = range.parse().map_err(|e| DiscoveryError::Portscan(format!("{range}: {e}")))?;
            hosts.extend(network.iter());
        }
        Ok(hosts)
    }

    async fn scan_host(ip: IpAddr, port_timeout: Duration) -> Option<DiscoveredDevice> {
        let mut open_ports = Vec::new();
        let mut services = HashMap::new();

        for (port, service) in WELL_KNOWN_PORTS {
            let addr = SocketAddr::new(ip, *port);
            if timeout(port_timeout, TcpStream::connect(addr)).await.is_ok_and(|r| r.is_ok()) {
                open_ports.push(*port);
                services.insert(*port, service.to_string());
            }
        }

        if open_ports.is_empty() {
            return None;
        }

        let mut device = DiscoveredDevice::new(ip, Origin::Portscan);
        device.open_ports = open_ports;
        device.services = services;
        Some(device)
    }
}

#[async_trait::async_trait]
impl DiscoveryMethod for ActivePortscan {
    fn name(&self) -> &str {
        "portscan"
    }

    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
        let hosts = self.hosts()?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.max(1)));
        let per_port_timeout = self.host_timeout / (WELL_KNOWN_PORTS.len() as u32).max(1);
        let per_port_timeout = per_port_timeout.max(Duration::from_millis(50));

        let mut tasks = Vec::with_capacity(hosts.len());
        for ip in hosts {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            tasks.push(tokio::spawn(async move {
                let result = Self::scan_host(ip, per_port_timeout).await;
                drop(permit);
                result
            }));
        }

        let mut devices = Vec::new();
        for task in tasks {
            if let Ok(Some(device)) = task.await {
                devices.push(device);
            }
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cidr_ranges_into_host_list() {
        let scanner = ActivePortscan::new(vec!["10.0.0.0/30".into()], 8, 1);
        let hosts = scanner.hosts().unwrap();
        assert_eq!(hosts.len(), 4);
    }

    #[test]
    fn rejects_malformed_range() {
        let scanner = ActivePortscan::new(vec!["not-a-cidr".into()], 8, 1);
        assert!(scanner.hosts().is_err());
    }
}
