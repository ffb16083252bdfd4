//! Shared domain value types
//!
//! Mirrors the entities in the data model: Device, DevicePort, Scan,
//! ComplianceCheckResult, Incident, PatternStats, FlapSuppression,
//! EvidenceBundle, UploadRecord.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Closed set of device classifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Workstation,
    Server,
    Network,
    Printer,
    Medical,
    Unknown,
}

/// Scan eligibility policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    Standard,
    Limited,
    Excluded,
}

/// Device lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Discovered,
    Monitored,
    Excluded,
    Offline,
}

/// Device compliance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    Drifted,
    Unknown,
    Excluded,
}

/// Origin of a discovered/ingested device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Directory,
    Neighbor,
    Portscan,
    Agent,
    Manual,
}

/// Device: the central inventory entity. Natural key is `ip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub ip: IpAddr,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub device_type: DeviceType,
    pub scan_policy: ScanPolicy,
    pub status: LifecycleStatus,
    pub compliance_status: ComplianceStatus,
    pub medical_device: bool,
    pub manually_opted_in: bool,
    pub phi_access_flag: bool,
    pub origin: Origin,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_scan: Option<DateTime<Utc>>,
    pub sync_version: u64,
    pub synced_to_central: bool,
    /// Operator annotations, surfaced by `GET /api/devices/{id}`.
    pub notes: Vec<String>,
    /// Advisory, non-load-bearing aggregate risk signal.
    pub risk_score: Option<f32>,
}

impl Device {
    /// Invariant I2: eligible for scanning iff scan_policy != excluded and
    /// (not medical_device or manually_opted_in).
    pub fn is_scan_eligible(&self) -> bool {
        self.scan_policy != ScanPolicy::Excluded && (!self.medical_device || self.manually_opted_in)
    }

    /// Invariant I1: medical + not opted-in forces excluded/excluded.
    pub fn enforce_medical_invariant(&mut self) {
        if self.medical_device && !self.manually_opted_in {
            self.scan_policy = ScanPolicy::Excluded;
            self.compliance_status = ComplianceStatus::Excluded;
            self.status = LifecycleStatus::Excluded;
        }
    }
}

/// Owned by a Device; (port, protocol) unique per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePort {
    pub device_id: Uuid,
    pub port: u16,
    pub protocol: String,
    pub service: Option<String>,
    pub service_version: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Full,
    Quick,
    Targeted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Api,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub devices_found: u32,
    pub new_devices: u32,
    pub changed_devices: u32,
    pub medical_excluded: u32,
    pub methods: Vec<String>,
    pub network_ranges: Vec<String>,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheckResult {
    pub id: Uuid,
    pub device_id: Uuid,
    pub check_type: String,
    pub control: Option<String>,
    pub control_family: Option<String>,
    pub outcome: CheckOutcome,
    pub details: serde_json::Value,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentLevel {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentOutcome {
    Success,
    Failure,
    Escalated,
    Suppressed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub site: String,
    pub host: String,
    pub incident_type: String,
    pub severity: Severity,
    pub raw_data: serde_json::Value,
    pub pattern_signature: String,
    pub created_at: DateTime<Utc>,
    pub level: Option<IncidentLevel>,
    pub action: Option<String>,
    pub outcome: Option<IncidentOutcome>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub human_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStats {
    pub pattern_signature: String,
    pub occurrences: u64,
    pub l1_resolutions: u64,
    pub l2_resolutions: u64,
    pub l3_escalations: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub avg_resolution_seconds: f64,
    pub recommended_action: Option<String>,
    pub promotion_eligible: bool,
    pub promoted: bool,
}

impl PatternStats {
    pub fn new(pattern_signature: String) -> Self {
        Self {
            pattern_signature,
            occurrences: 0,
            l1_resolutions: 0,
            l2_resolutions: 0,
            l3_escalations: 0,
            success_count: 0,
            success_rate: 0.0,
            avg_resolution_seconds: 0.0,
            recommended_action: None,
            promotion_eligible: false,
            promoted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlapSuppression {
    pub site: String,
    pub host: String,
    pub incident_type: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub cleared_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub id: Uuid,
    pub site: String,
    pub source: String,
    pub reference: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    pub signature: String,
    pub chain_position: u64,
    pub bundle_hash: String,
    pub chain_hash: String,
    pub framework_tags: Option<std::collections::HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub bundle_id: Uuid,
    pub destinations: Vec<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub retention_until: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub attempt: u32,
    pub last_error: Option<String>,
}

/// A lightweight record emitted by a discovery method, merged by IP
/// before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ip: IpAddr,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub os: Option<String>,
    pub vendor: Option<String>,
    pub open_ports: Vec<u16>,
    pub services: std::collections::HashMap<u16, String>,
    pub origin: Origin,
    pub timestamp: DateTime<Utc>,
    /// Diagnostic: which methods contributed to this merged record.
    pub sources: Vec<Origin>,
}

impl DiscoveredDevice {
    pub fn new(ip: IpAddr, origin: Origin) -> Self {
        Self {
            ip,
            hostname: None,
            mac: None,
            os: None,
            vendor: None,
            open_ports: Vec::new(),
            services: std::collections::HashMap::new(),
            origin,
            timestamp: Utc::now(),
            sources: vec![origin],
        }
    }

    /// Merge another record into self, preferring non-empty fields and
    /// union-ing ports/services, per the Discovery Fabric's merge rule.
    pub fn merge(&mut self, other: &DiscoveredDevice) {
        if self.hostname.is_none() {
            self.hostname = other.hostname.clone();
        }
        if self.mac.is_none() {
            self.mac = other.mac.clone();
        }
        if self.os.is_none() {
            self.os = other.os.clone();
        }
        if self.vendor.is_none() {
            self.vendor = other.vendor.clone();
        }
        for p in &other.open_ports {
            if !self.open_ports.contains(p) {
                self.open_ports.push(*p);
            }
        }
        for (port, svc) in &other.services {
            self.services.entry(*port).or_insert_with(|| svc.clone());
        }
        if other.timestamp > self.timestamp {
            self.timestamp = other.timestamp;
        }
        for src in &other.sources {
            if !self.sources.contains(src) {
                self.sources.push(*src);
            }
        }
    }
}
