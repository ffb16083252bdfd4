//! YAML configuration loader
//!
//! Recognizes exactly the keys documented in the spec's external
//! interfaces section. Unknown keys are ignored by serde's default
//! behavior; every field has a sensible default so a minimal file
//! (or none at all) still produces a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ApplianceError, ApplianceResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network_ranges: Vec<String>,
    pub discovery: DiscoveryConfig,
    pub directory: DirectoryConfig,
    pub portscan: PortscanConfig,
    pub schedule: ScheduleConfig,
    pub api: ApiConfig,
    pub paths: PathsConfig,
    pub central: CentralConfig,
    pub worm: WormConfig,
    pub exclude_medical_by_default: bool,
    pub healing: HealingConfig,
    pub safety: SafetyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network_ranges: vec!["auto".to_string()],
            discovery: DiscoveryConfig::default(),
            directory: DirectoryConfig::default(),
            portscan: PortscanConfig::default(),
            schedule: ScheduleConfig::default(),
            api: ApiConfig::default(),
            paths: PathsConfig::default(),
            central: CentralConfig::default(),
            worm: WormConfig::default(),
            exclude_medical_by_default: true,
            healing: HealingConfig::default(),
            safety: SafetyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub directory: bool,
    pub neighbor: bool,
    pub portscan: bool,
    pub agent: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { directory: false, neighbor: true, portscan: true, agent: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub server: Option<String>,
    pub base_dn: Option<String>,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub ssl: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortscanConfig {
    pub arguments: String,
    pub host_timeout_seconds: u64,
    pub max_concurrent: usize,
}

impl Default for PortscanConfig {
    fn default() -> Self {
        Self { arguments: String::new(), host_timeout_seconds: 5, max_concurrent: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { hour: 2, minute: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8088 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db: PathBuf,
    pub credentials: PathBuf,
    pub evidence_dir: PathBuf,
    pub runbooks_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub signing_key: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("/var/lib/compliance-appliance/db"),
            credentials: PathBuf::from("/etc/compliance-appliance/credentials.yaml"),
            evidence_dir: PathBuf::from("/var/lib/compliance-appliance/evidence"),
            runbooks_dir: PathBuf::from("/etc/compliance-appliance/runbooks"),
            rules_dir: PathBuf::from("/etc/compliance-appliance/rules"),
            signing_key: PathBuf::from("/etc/compliance-appliance/signing_key"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    pub url: Option<String>,
    pub site_id: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WormMode {
    Proxy,
    Direct,
}

impl Default for WormMode {
    fn default() -> Self {
        WormMode::Proxy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WormConfig {
    pub enabled: bool,
    pub mode: WormMode,
    pub retention_days: u32,
    pub max_retries: u32,
    pub batch_size: usize,
    pub auto_upload: bool,
}

impl Default for WormConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: WormMode::Proxy,
            retention_days: 2555, // 7 years
            max_retries: 5,
            batch_size: 20,
            auto_upload: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub level1_enabled: bool,
    pub level2_enabled: bool,
    pub level3_enabled: bool,
    pub learning_enabled: bool,
    pub flap_threshold: u32,
    pub flap_window_minutes: i64,
    pub promotion_min_occurrences: u64,
    pub promotion_min_l2: u64,
    pub promotion_min_success: f64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            level1_enabled: true,
            level2_enabled: true,
            level3_enabled: true,
            learning_enabled: true,
            flap_threshold: 3,
            flap_window_minutes: 120,
            promotion_min_occurrences: 5,
            promotion_min_l2: 3,
            promotion_min_success: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub cooldown_seconds: u64,
    pub client_hourly: u32,
    pub global_hourly: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_timeout: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            client_hourly: 100,
            global_hourly: 1000,
            circuit_failure_threshold: 5,
            circuit_timeout: 60,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file, normalizing `exclude_medical_by_default`
    /// to true unconditionally (spec.md §6: "enforced true; any other
    /// value is normalized to true").
    pub fn load(path: &Path) -> ApplianceResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(ApplianceError::Io)?;
        let mut config: AppConfig = serde_yaml::from_str(&raw)
            .map_err(|e| ApplianceError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.exclude_medical_by_default = true;
        Ok(config)
    }
}

/// Separate credentials file, kept apart from the main configuration
/// to contain blast radius.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub directory: Option<DirectoryCredentials>,
    pub snmp: Option<SnmpCredentials>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryCredentials {
    pub bind_dn: String,
    pub bind_password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnmpCredentials {
    pub community: String,
}

impl Credentials {
    pub fn load(path: &Path) -> ApplianceResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(ApplianceError::Io)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| ApplianceError::Config(format!("failed to parse {}: {e}", path.display())))
    }
}
