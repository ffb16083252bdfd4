//! Pure device classification.
//!
//! `classify` maps a `DiscoveredDevice` to a `Classification`. No I/O,
//! no shared state — evaluation order is highest-priority-first and
//! the first matching rule wins, per the medical-device safety
//! requirement: a device matching the medical rule never reaches any
//! later rule.

use compliance_common::domain::DeviceType;
use compliance_common::DiscoveredDevice;
use std::collections::HashSet;

/// Medical device protocol ports (DICOM/HL7 family).
pub const MEDICAL_DEVICE_PORTS: &[u16] = &[
    104, 2575, 2761, 2762, 11112, 4242, 8042, 8043, 11113, 11114, 11115,
];

const MEDICAL_HOSTNAME_PATTERNS: &[&str] = &[
    "modality", "pacs", "dicom", "xray", "ct-", "mri-", "ultrasound",
    "ventilator", "ecg", "ekg", "infusion", "monitor-", "philips",
    "ge-healthcare", "siemens",
];

const MEDICAL_SERVICE_PATTERNS: &[&str] = &["dicom", "hl7", "fhir", "pacs"];

const DC_PORTS: &[u16] = &[88, 389, 636, 3268, 3269];

const SERVER_PORTS: &[u16] = &[
    22, 25, 53, 80, 110, 143, 443, 445, 1433, 1521, 3306, 5432, 5985, 5986, 8080, 8443,
];
const SERVER_HOSTNAME_HINTS: &[&str] = &["srv", "server", "app", "db", "web", "mail", "sql", "file"];

const NETWORK_MGMT_PORTS: &[u16] = &[23, 830];
const NETWORK_SERVICE_HINTS: &[&str] = &["snmp", "cisco", "juniper", "netconf", "ssh"];
const NETWORK_HOSTNAME_HINTS: &[&str] = &[
    "router", "switch", "fw", "firewall", "ap-", "wap", "ubnt", "unifi", "cisco", "juniper", "meraki",
];

const PRINTER_PORTS: &[u16] = &[9100, 515, 631];
const PRINTER_HOSTNAME_HINTS: &[&str] = &[
    "print", "prn", "mfp", "copier", "hp-", "xerox", "canon", "epson", "brother", "ricoh", "lexmark",
];
const PRINTER_SERVICE_HINTS: &[&str] = &["print", "jetdirect", "ipp"];

const WORKSTATION_SERVER_PORTS: &[u16] = &[22, 25, 53, 80, 443, 445, 1433, 3306];
const WORKSTATION_OS_HINTS: &[&str] = &["windows 10", "windows 11", "macos", "ubuntu desktop"];
const WORKSTATION_HOSTNAME_HINTS: &[&str] = &["pc", "desktop", "laptop", "ws-", "client"];

/// Result of classifying a discovered device.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub device_type: DeviceType,
    pub confidence: f32,
    pub reason: String,
    pub is_medical: bool,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify a discovered device. Pure function, deterministic,
/// first-matching-rule-wins in priority order: medical, domain
/// controller, server, network, printer, workstation, unknown.
pub fn classify(device: &DiscoveredDevice) -> Classification {
    let ports: HashSet<u16> = device.open_ports.iter().copied().collect();
    let hostname_lower = device.hostname.clone().unwrap_or_default().to_lowercase();
    let os_lower = device.os.clone().unwrap_or_default().to_lowercase();

    if let Some(c) = detect_medical(&ports, &hostname_lower, &device.services) {
        return c;
    }
    if let Some(c) = detect_domain_controller(&ports) {
        return c;
    }
    if let Some(c) = detect_server(&ports, &hostname_lower, &os_lower) {
        return c;
    }
    if let Some(c) = detect_network(&ports, &hostname_lower, &device.services) {
        return c;
    }
    if let Some(c) = detect_printer(&ports, &hostname_lower, &device.services) {
        return c;
    }
    if let Some(c) = detect_workstation(&ports, &hostname_lower, &os_lower) {
        return c;
    }

    Classification {
        device_type: DeviceType::Unknown,
        confidence: 0.3,
        reason: "No clear classification signals".to_string(),
        is_medical: false,
    }
}

fn detect_medical(
    ports: &HashSet<u16>,
    hostname_lower: &str,
    services: &std::collections::HashMap<u16, String>,
) -> Option<Classification> {
    let matched: Vec<u16> = MEDICAL_DEVICE_PORTS.iter().copied().filter(|p| ports.contains(p)).collect();
    if !matched.is_empty() {
        return Some(Classification {
            device_type: DeviceType::Medical,
            confidence: 0.95,
            reason: format!("Medical protocol ports detected: {matched:?}"),
            is_medical: true,
        });
    }

    for (port, service) in services {
        let service_lower = service.to_lowercase();
        if contains_any(&service_lower, MEDICAL_SERVICE_PATTERNS) {
            return Some(Classification {
                device_type: DeviceType::Medical,
                confidence: 0.90,
                reason: format!("Medical service detected: {service} on port {port}"),
                is_medical: true,
            });
        }
    }

    for pattern in MEDICAL_HOSTNAME_PATTERNS {
        if hostname_lower.contains(pattern) {
            return Some(Classification {
                device_type: DeviceType::Medical,
                confidence: 0.80,
                reason: format!("Medical hostname pattern detected: {pattern}"),
                is_medical: true,
            });
        }
    }

    None
}

fn detect_domain_controller(ports: &HashSet<u16>) -> Option<Classification> {
    let count = DC_PORTS.iter().filter(|p| ports.contains(p)).count();
    if count >= 3 {
        return Some(Classification {
            device_type: DeviceType::Server,
            confidence: 0.95,
            reason: format!("Domain Controller detected ({count} DC ports)"),
            is_medical: false,
        });
    }
    None
}

fn detect_server(ports: &HashSet<u16>, hostname_lower: &str, os_lower: &str) -> Option<Classification> {
    let count = SERVER_PORTS.iter().filter(|p| ports.contains(p)).count();

    if count >= 4 {
        return Some(Classification {
            device_type: DeviceType::Server,
            confidence: 0.90,
            reason: format!("Multiple server ports detected ({count})"),
            is_medical: false,
        });
    }

    if os_lower.contains("server") {
        return Some(Classification {
            device_type: DeviceType::Server,
            confidence: 0.95,
            reason: "Server OS detected".to_string(),
            is_medical: false,
        });
    }

    if contains_any(hostname_lower, SERVER_HOSTNAME_HINTS) && count >= 2 {
        return Some(Classification {
            device_type: DeviceType::Server,
            confidence: 0.80,
            reason: "Server hostname with service ports".to_string(),
            is_medical: false,
        });
    }

    None
}

fn detect_network(
    ports: &HashSet<u16>,
    hostname_lower: &str,
    services: &std::collections::HashMap<u16, String>,
) -> Option<Classification> {
    let has_snmp = ports.contains(&161) || ports.contains(&162);
    let has_mgmt_port = NETWORK_MGMT_PORTS.iter().any(|p| ports.contains(p));
    let has_network_service = services.values().any(|svc| contains_any(&svc.to_lowercase(), NETWORK_SERVICE_HINTS));

    if has_snmp && (has_mgmt_port || has_network_service) {
        return Some(Classification {
            device_type: DeviceType::Network,
            confidence: 0.90,
            reason: "SNMP with network management protocols".to_string(),
            is_medical: false,
        });
    }

    if contains_any(hostname_lower, NETWORK_HOSTNAME_HINTS) {
        return Some(Classification {
            device_type: DeviceType::Network,
            confidence: 0.85,
            reason: "Network device hostname pattern".to_string(),
            is_medical: false,
        });
    }

    if has_snmp && ports.len() <= 5 {
        return Some(Classification {
            device_type: DeviceType::Network,
            confidence: 0.70,
            reason: "SNMP with minimal services (likely network device)".to_string(),
            is_medical: false,
        });
    }

    None
}

fn detect_printer(
    ports: &HashSet<u16>,
    hostname_lower: &str,
    services: &std::collections::HashMap<u16, String>,
) -> Option<Classification> {
    let matched: Vec<u16> = PRINTER_PORTS.iter().copied().filter(|p| ports.contains(p)).collect();
    if !matched.is_empty() {
        return Some(Classification {
            device_type: DeviceType::Printer,
            confidence: 0.90,
            reason: format!("Printer port detected ({matched:?})"),
            is_medical: false,
        });
    }

    if contains_any(hostname_lower, PRINTER_HOSTNAME_HINTS) {
        return Some(Classification {
            device_type: DeviceType::Printer,
            confidence: 0.80,
            reason: "Printer hostname pattern".to_string(),
            is_medical: false,
        });
    }

    for service in services.values() {
        if contains_any(&service.to_lowercase(), PRINTER_SERVICE_HINTS) {
            return Some(Classification {
                device_type: DeviceType::Printer,
                confidence: 0.85,
                reason: format!("Printer service detected: {service}"),
                is_medical: false,
            });
        }
    }

    None
}

fn detect_workstation(ports: &HashSet<u16>, hostname_lower: &str, os_lower: &str) -> Option<Classification> {
    let has_rdp = ports.contains(&3389);
    let server_count = WORKSTATION_SERVER_PORTS.iter().filter(|p| ports.contains(p)).count();
    let is_workstation_os = contains_any(os_lower, WORKSTATION_OS_HINTS);

    if has_rdp && server_count <= 2 {
        return Some(Classification {
            device_type: DeviceType::Workstation,
            confidence: 0.85,
            reason: "RDP with limited server ports".to_string(),
            is_medical: false,
        });
    }

    if is_workstation_os {
        return Some(Classification {
            device_type: DeviceType::Workstation,
            confidence: 0.90,
            reason: "Workstation OS detected".to_string(),
            is_medical: false,
        });
    }

    if contains_any(hostname_lower, WORKSTATION_HOSTNAME_HINTS) {
        return Some(Classification {
            device_type: DeviceType::Workstation,
            confidence: 0.75,
            reason: "Workstation hostname pattern".to_string(),
            is_medical: false,
        });
    }

    if has_rdp {
        return Some(Classification {
            device_type: DeviceType::Workstation,
            confidence: 0.70,
            reason: "RDP enabled".to_string(),
            is_medical: false,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_common::Origin;
    use std::net::{IpAddr, Ipv4Addr};

    fn device(ip: &str, hostname: Option<&str>, ports: &[u16], os: Option<&str>) -> DiscoveredDevice {
        let mut d = DiscoveredDevice::new(IpAddr::V4(ip.parse::<Ipv4Addr>().unwrap()), Origin::Portscan);
        d.hostname = hostname.map(|s| s.to_string());
        d.open_ports = ports.to_vec();
        d.os = os.map(|s| s.to_string());
        d
    }

    #[test]
    fn medical_port_forces_medical_regardless_of_hostname_or_os() {
        let d = device("10.0.0.20", Some("totally-a-workstation"), &[104, 11112], Some("Windows Server 2022"));
        let c = classify(&d);
        assert!(c.is_medical);
        assert_eq!(c.device_type, DeviceType::Medical);
    }

    #[test]
    fn medical_hostname_pattern_detected_without_ports() {
        let d = device("10.0.0.21", Some("pacs01"), &[], None);
        let c = classify(&d);
        assert!(c.is_medical);
    }

    #[test]
    fn medical_rule_is_non_overridable() {
        // Matches medical AND domain-controller-shaped port set; medical wins.
        let d = device("10.0.0.22", Some("dc-dicom"), &[104, 88, 389, 636], None);
        let c = classify(&d);
        assert!(c.is_medical);
        assert_eq!(c.device_type, DeviceType::Medical);
    }

    #[test]
    fn domain_controller_by_three_ports() {
        let d = device("10.0.0.30", None, &[88, 389, 636], None);
        let c = classify(&d);
        assert_eq!(c.device_type, DeviceType::Server);
        assert!(!c.is_medical);
    }

    #[test]
    fn server_by_hostname_and_two_ports() {
        let d = device("10.0.0.31", Some("srv-web"), &[22, 80, 443], Some("linux"));
        let c = classify(&d);
        assert_eq!(c.device_type, DeviceType::Server);
    }

    #[test]
    fn printer_by_port() {
        let d = device("10.0.0.40", None, &[9100], None);
        assert_eq!(classify(&d).device_type, DeviceType::Printer);
    }

    #[test]
    fn workstation_by_rdp_without_server_ports() {
        let d = device("10.0.0.50", None, &[3389], None);
        assert_eq!(classify(&d).device_type, DeviceType::Workstation);
    }

    #[test]
    fn unknown_when_no_signal() {
        let d = device("10.0.0.60", None, &[], None);
        assert_eq!(classify(&d).device_type, DeviceType::Unknown);
    }

    #[test]
    fn tie_break_is_first_rule_in_priority_order() {
        // 4 server ports AND rdp present: server rule runs first and wins.
        let d = device("10.0.0.70", None, &[22, 25, 53, 80, 3389], None);
        assert_eq!(classify(&d).device_type, DeviceType::Server);
    }
}
