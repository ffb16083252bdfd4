//! Fixed HIPAA-mapped network compliance check catalog.
//!
//! Each check is a pure function over a device's classification and
//! its current port set — no I/O, deterministic, safe to re-run as
//! often as the Compliance Runner schedules it.

use chrono::Utc;
use compliance_common::domain::{CheckOutcome, ComplianceCheckResult, DevicePort, DeviceType};
use uuid::Uuid;

/// Cleartext/legacy protocols that must never be exposed.
const PROHIBITED_PORTS: &[(u16, &str)] = &[
    (21, "FTP (cleartext)"),
    (23, "Telnet (cleartext)"),
    (69, "TFTP (cleartext, no auth)"),
    (512, "rexec (legacy, cleartext)"),
    (513, "rlogin (legacy, cleartext)"),
    (514, "rsh (legacy, cleartext)"),
];

const DATABASE_PORTS: &[(u16, &str)] = &[
    (3306, "MySQL"),
    (5432, "PostgreSQL"),
    (1433, "MSSQL"),
    (1434, "MSSQL Browser"),
    (27017, "MongoDB"),
    (6379, "Redis"),
    (9042, "Cassandra"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    ProhibitedPorts,
    EncryptedWeb,
    TlsAltWeb,
    DatabaseExposure,
    SnmpSecurity,
    RdpExposure,
    Inventory,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::ProhibitedPorts => "prohibited_ports",
            CheckType::EncryptedWeb => "encrypted_services",
            CheckType::TlsAltWeb => "tls_web_services",
            CheckType::DatabaseExposure => "database_exposure",
            CheckType::SnmpSecurity => "snmp_security",
            CheckType::RdpExposure => "rdp_exposure",
            CheckType::Inventory => "device_inventory",
        }
    }

    pub fn hipaa_control(&self) -> &'static str {
        match self {
            CheckType::ProhibitedPorts => "§164.312(a)(1)",
            CheckType::EncryptedWeb => "§164.312(e)(1)",
            CheckType::TlsAltWeb => "§164.312(a)(2)(iv)",
            CheckType::DatabaseExposure => "§164.312(a)(1)",
            CheckType::SnmpSecurity => "§164.312(a)(2)(i)",
            CheckType::RdpExposure => "§164.312(a)(1)",
            CheckType::Inventory => "§164.308(a)(1)(ii)(B)",
        }
    }

    /// Device types this check runs against. The full catalog runs
    /// for every device; a check not applicable to a device type is
    /// simply skipped rather than reported as a pass.
    fn applicable(&self, device_type: DeviceType) -> bool {
        use DeviceType::*;
        match self {
            CheckType::ProhibitedPorts | CheckType::SnmpSecurity | CheckType::Inventory => {
                matches!(device_type, Workstation | Server | Network | Printer | Unknown)
            }
            CheckType::EncryptedWeb => matches!(device_type, Workstation | Server | Unknown),
            CheckType::TlsAltWeb => matches!(device_type, Server),
            CheckType::DatabaseExposure => matches!(device_type, Workstation | Network | Printer | Unknown),
            CheckType::RdpExposure => matches!(device_type, Server | Network | Printer | Unknown),
        }
    }

    /// All checks, in evaluation order. Order matters for the fixed
    /// catalog's readability but not for correctness — each check is
    /// independent.
    pub fn all() -> &'static [CheckType] {
        &[
            CheckType::ProhibitedPorts,
            CheckType::EncryptedWeb,
            CheckType::TlsAltWeb,
            CheckType::DatabaseExposure,
            CheckType::SnmpSecurity,
            CheckType::RdpExposure,
            CheckType::Inventory,
        ]
    }
}

/// Runs the fixed check catalog against a device's port set, skipping
/// checks not applicable to its classification.
pub struct CheckEngine;

impl CheckEngine {
    pub fn run_all(device_id: Uuid, device_type: DeviceType, ports: &[DevicePort]) -> Vec<ComplianceCheckResult> {
        CheckType::all()
            .iter()
            .filter(|c| c.applicable(device_type))
            .map(|c| Self::run_one(device_id, device_type, *c, ports))
            .collect()
    }

    fn run_one(device_id: Uuid, device_type: DeviceType, check: CheckType, ports: &[DevicePort]) -> ComplianceCheckResult {
        let (outcome, details) = match check {
            CheckType::ProhibitedPorts => check_prohibited_ports(ports),
            CheckType::EncryptedWeb => check_encrypted_web(ports),
            CheckType::TlsAltWeb => check_tls_alt_web(ports),
            CheckType::DatabaseExposure => check_database_exposure(ports, device_type),
            CheckType::SnmpSecurity => check_snmp_security(ports),
            CheckType::RdpExposure => check_rdp_exposure(ports, device_type),
            CheckType::Inventory => check_inventory(ports),
        };
        ComplianceCheckResult {
            id: Uuid::new_v4(),
            device_id,
            check_type: check.as_str().to_string(),
            control: Some(check.hipaa_control().to_string()),
            control_family: Some("technical_safeguards".to_string()),
            outcome,
            details,
            checked_at: Utc::now(),
        }
    }
}

fn has_port(ports: &[DevicePort], port: u16) -> bool {
    ports.iter().any(|p| p.port == port)
}

fn check_prohibited_ports(ports: &[DevicePort]) -> (CheckOutcome, serde_json::Value) {
    let found: Vec<_> = PROHIBITED_PORTS.iter().filter(|(p, _)| has_port(ports, *p)).collect();
    if found.is_empty() {
        return (CheckOutcome::Pass, serde_json::json!({"message": "No prohibited ports detected"}));
    }
    let names: Vec<&str> = found.iter().map(|(_, n)| *n).collect();
    (
        CheckOutcome::Fail,
        serde_json::json!({
            "prohibited_ports": found.iter().map(|(p, n)| (p.to_string(), n)).collect::<std::collections::HashMap<_, _>>(),
            "message": format!("Cleartext/legacy protocols exposed: {}", names.join(", ")),
        }),
    )
}

fn check_encrypted_web(ports: &[DevicePort]) -> (CheckOutcome, serde_json::Value) {
    let has_http = has_port(ports, 80);
    let has_https = has_port(ports, 443);
    if has_http && !has_https {
        return (
            CheckOutcome::Fail,
            serde_json::json!({"message": "HTTP (80) exposed without HTTPS (443) — cleartext web traffic"}),
        );
    }
    if has_http && has_https {
        return (
            CheckOutcome::Warn,
            serde_json::json!({"message": "HTTP (80) and HTTPS (443) both open — ensure HTTP redirects to HTTPS"}),
        );
    }
    (CheckOutcome::Pass, serde_json::json!({"message": "Web services properly encrypted or not exposed"}))
}

fn check_tls_alt_web(ports: &[DevicePort]) -> (CheckOutcome, serde_json::Value) {
    let has_8080 = has_port(ports, 8080);
    let has_8443 = has_port(ports, 8443);
    if has_8080 && !has_8443 {
        return (
            CheckOutcome::Warn,
            serde_json::json!({"message": "HTTP alt (8080) without HTTPS alt (8443) — may lack TLS"}),
        );
    }
    (CheckOutcome::Pass, serde_json::json!({"message": "Alternative web service ports properly secured or not exposed"}))
}

fn check_database_exposure(ports: &[DevicePort], device_type: DeviceType) -> (CheckOutcome, serde_json::Value) {
    let found: Vec<_> = DATABASE_PORTS.iter().filter(|(p, _)| has_port(ports, *p)).collect();
    if found.is_empty() {
        return (CheckOutcome::Pass, serde_json::json!({"message": "No unexpected database services exposed"}));
    }
    let names: Vec<&str> = found.iter().map(|(_, n)| *n).collect();
    (
        CheckOutcome::Fail,
        serde_json::json!({
            "exposed_databases": found.iter().map(|(p, n)| (p.to_string(), n)).collect::<std::collections::HashMap<_, _>>(),
            "message": format!("Database services on {:?}: {}", device_type, names.join(", ")),
        }),
    )
}

fn check_snmp_security(ports: &[DevicePort]) -> (CheckOutcome, serde_json::Value) {
    let snmp_ports: Vec<u16> = [161u16, 162].into_iter().filter(|p| has_port(ports, *p)).collect();
    if !snmp_ports.is_empty() {
        return (
            CheckOutcome::Warn,
            serde_json::json!({
                "snmp_ports": snmp_ports,
                "message": "SNMP detected — verify SNMPv3 with authentication is in use",
            }),
        );
    }
    (CheckOutcome::Pass, serde_json::json!({"message": "No SNMP services exposed"}))
}

fn check_rdp_exposure(ports: &[DevicePort], device_type: DeviceType) -> (CheckOutcome, serde_json::Value) {
    if has_port(ports, 3389) {
        return (
            CheckOutcome::Warn,
            serde_json::json!({"message": format!("RDP (3389) exposed on {:?} — review access controls", device_type)}),
        );
    }
    (CheckOutcome::Pass, serde_json::json!({"message": "RDP not exposed on non-workstation device"}))
}

fn check_inventory(ports: &[DevicePort]) -> (CheckOutcome, serde_json::Value) {
    if ports.is_empty() {
        return (
            CheckOutcome::Warn,
            serde_json::json!({"message": "No port data — device needs a scan for complete inventory"}),
        );
    }
    (
        CheckOutcome::Pass,
        serde_json::json!({
            "ports_found": ports.len(),
            "message": format!("Device inventoried with {} open port(s)", ports.len()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(n: u16) -> DevicePort {
        DevicePort {
            device_id: Uuid::nil(),
            port: n,
            protocol: "tcp".into(),
            service: None,
            service_version: None,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn prohibited_port_fails() {
        let (outcome, _) = check_prohibited_ports(&[port(23)]);
        assert_eq!(outcome, CheckOutcome::Fail);
    }

    #[test]
    fn http_alone_fails_encrypted_web() {
        let (outcome, _) = check_encrypted_web(&[port(80)]);
        assert_eq!(outcome, CheckOutcome::Fail);
    }

    #[test]
    fn http_and_https_warns() {
        let (outcome, _) = check_encrypted_web(&[port(80), port(443)]);
        assert_eq!(outcome, CheckOutcome::Warn);
    }

    #[test]
    fn https_only_passes() {
        let (outcome, _) = check_encrypted_web(&[port(443)]);
        assert_eq!(outcome, CheckOutcome::Pass);
    }

    #[test]
    fn empty_ports_warns_inventory() {
        let (outcome, _) = check_inventory(&[]);
        assert_eq!(outcome, CheckOutcome::Warn);
    }

    #[test]
    fn run_all_skips_inapplicable_checks_for_printer() {
        let results = CheckEngine::run_all(Uuid::new_v4(), DeviceType::Printer, &[port(9100)]);
        assert!(results.iter().all(|r| r.check_type != "tls_web_services"));
        assert!(results.iter().any(|r| r.check_type == "rdp_exposure"));
    }

    #[test]
    fn database_port_on_workstation_fails() {
        let (outcome, _) = check_database_exposure(&[port(5432)], DeviceType::Workstation);
        assert_eq!(outcome, CheckOutcome::Fail);
    }
}
