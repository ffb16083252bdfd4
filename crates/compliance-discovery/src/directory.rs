//! Corporate directory discovery via LDAP bind+search.
//!
//! Grounded on `original_source/.../discovery/ad_discovery.py`'s
//! connect-bind-search-unbind sequence. `ldap3` is a synchronous
//! client; the blocking search runs on `spawn_blocking` the same way
//! `compliance-runbooks`' SSH transport bridges `ssh2`.

use compliance_common::domain::{DiscoveredDevice, Origin};
use ldap3::{LdapConn, Scope, SearchEntry};
use std::net::IpAddr;

use crate::{DiscoveryError, DiscoveryMethod, DiscoveryResult};

pub struct DirectoryQuery {
    pub server: String,
    pub port: u16,
    pub base_dn: String,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub use_ssl: bool,
}

impl DirectoryQuery {
    pub fn new(server: String, base_dn: String) -> Self {
        Self { server, port: 389, base_dn, bind_dn: None, bind_password: None, use_ssl: false }
    }

    fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.server, self.port)
    }

    /// Blocking search, run inside `spawn_blocking`.
    fn search_blocking(server_url: String, base_dn: String, bind_dn: Option<String>, bind_password: Option<String>) -> DiscoveryResult<Vec<DiscoveredDevice>> {
        let mut conn = LdapConn::new(&server_url).map_err(|e| DiscoveryError::Directory(e.to_string()))?;
        match (bind_dn, bind_password) {
            (Some(dn), Some(pw)) => {
                conn.simple_bind(&dn, &pw).map_err(|e| DiscoveryError::Directory(e.to_string()))?;
            }
            _ => {
                conn.simple_bind("", "").map_err(|e| DiscoveryError::Directory(e.to_string()))?;
            }
        }

        let (results, _) = conn
            .search(
                &base_dn,
                Scope::Subtree,
                "(objectClass=computer)",
                vec!["dNSHostName", "operatingSystem", "operatingSystemVersion", "distinguishedName"],
            )
            .and_then(|r| r.success())
            .map_err(|e| DiscoveryError::Directory(e.to_string()))?;

        let mut devices = Vec::new();
        for entry in results {
            let entry = SearchEntry::construct(entry);
            let hostname = entry.attrs.get("dNSHostName").and_then(|v| v.first()).cloned();
            let os_name = entry.attrs.get("operatingSystem").and_then(|v| v.first()).cloned();
            let os_version = entry.attrs.get("operatingSystemVersion").and_then(|v| v.first()).cloned();

            // IP is resolved by the Orchestrator; AD computer objects
            // don't carry one directly. Skip entries we can't resolve
            // to *something* addressable — hostname stands in until
            // the Orchestrator's DNS resolution pass fills in the IP.
            let Some(ref hostname) = hostname else { continue };
            let Ok(ip) = resolve_placeholder(hostname) else { continue };

            let mut device = DiscoveredDevice::new(ip, Origin::Directory);
            device.hostname = Some(hostname.clone());
            device.os = os_name;
            if let Some(version) = os_version {
                device.os = device.os.map(|os| format!("{os} {version}"));
            }
            devices.push(device);
        }

        let _ = conn.unbind();
        Ok(devices)
    }
}

/// Placeholder DNS resolution used until the Orchestrator's resolver
/// is wired in; directory discovery is disabled by default
/// (`config.discovery.directory = false`) precisely because IP
/// resolution for AD computer objects needs a real resolver in front
/// of it in most clinic environments.
fn resolve_placeholder(hostname: &str) -> Result<IpAddr, ()> {
    use std::net::ToSocketAddrs;
    (hostname, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
        .ok_or(())
}

#[async_trait::async_trait]
impl DiscoveryMethod for DirectoryQuery {
    fn name(&self) -> &str {
        "directory"
    }

    async fn is_available(&self) -> bool {
        let url = self.url();
        tokio::task::spawn_blocking(move || LdapConn::new(&url).is_ok()).await.unwrap_or(false)
    }

    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
        let url = self.url();
        let base_dn = self.base_dn.clone();
        let bind_dn = self.bind_dn.clone();
        let bind_password = self.bind_password.clone();
        tokio::task::spawn_blocking(move || Self::search_blocking(url, base_dn, bind_dn, bind_password))
            .await
            .map_err(|e| DiscoveryError::Directory(e.to_string()))?
    }
}
