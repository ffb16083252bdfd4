//! Scan pipeline: run enabled discovery methods, merge and classify
//! their output, upsert the inventory, then run the compliance catalog
//! over everything that is newly or still scannable. One call per
//! scheduled tick or `POST /api/scans/trigger`.

use chrono::Utc;
use compliance_checks::CheckEngine;
use compliance_classifier::classify;
use compliance_common::domain::{
    CheckOutcome, ComplianceStatus, Device, DevicePort, LifecycleStatus, Scan, ScanPolicy, ScanType, Severity, TriggerSource,
};
use compliance_discovery::{merge_by_ip, DiscoveryMethod};
use compliance_healing::HealingEngine;
use compliance_store::Store;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub scan: Scan,
    pub devices_checked: usize,
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
}

/// Step (b)-(h) of §4.8: discover, dedup, classify, upsert, transition,
/// run checks, close. Step (a) — opening the Scan row — happens first
/// so a crash mid-scan still leaves a `running` row behind rather than
/// nothing at all.
#[allow(clippy::too_many_arguments)]
pub async fn run_scan(
    store: &Store,
    methods: &[Arc<dyn DiscoveryMethod>],
    network_ranges: Vec<String>,
    scan_type: ScanType,
    trigger: TriggerSource,
    healing: Option<&HealingEngine>,
    site_id: &str,
) -> OrchestratorResult<ScanOutcome> {
    if methods.is_empty() {
        return Err(OrchestratorError::NoDiscoveryMethods);
    }

    let mut method_names = Vec::with_capacity(methods.len());
    for method in methods {
        if method.is_available().await {
            method_names.push(method.name().to_string());
        }
    }

    let scan = store.create_scan(scan_type, method_names, network_ranges, trigger)?;

    let mut batches = Vec::with_capacity(methods.len());
    for method in methods {
        if !method.is_available().await {
            continue;
        }
        match method.discover().await {
            Ok(devices) => batches.push(devices),
            Err(e) => tracing::warn!(method = method.name(), error = %e, "discovery method failed; continuing with the rest"),
        }
    }

    let merged = merge_by_ip(batches);
    let devices_found = merged.len() as u32;

    let mut new_devices = 0u32;
    let mut changed_devices = 0u32;
    let mut medical_excluded = 0u32;

    for discovered in &merged {
        let classification = classify(discovered);
        let now = Utc::now();

        let device = Device {
            id: Uuid::new_v4(),
            ip: discovered.ip,
            hostname: discovered.hostname.clone(),
            mac: discovered.mac.clone(),
            os_name: discovered.os.clone(),
            os_version: None,
            manufacturer: discovered.vendor.clone(),
            model: None,
            device_type: classification.device_type,
            scan_policy: if classification.is_medical { ScanPolicy::Excluded } else { ScanPolicy::Standard },
            status: if classification.is_medical { LifecycleStatus::Excluded } else { LifecycleStatus::Discovered },
            compliance_status: if classification.is_medical { ComplianceStatus::Excluded } else { ComplianceStatus::Unknown },
            medical_device: classification.is_medical,
            manually_opted_in: false,
            phi_access_flag: false,
            origin: discovered.origin,
            first_seen: now,
            last_seen: now,
            last_scan: None,
            sync_version: 0,
            synced_to_central: false,
            notes: Vec::new(),
            risk_score: None,
        };

        if classification.is_medical {
            medical_excluded += 1;
        }

        let (is_new, is_changed) = store.upsert_device(device)?;
        if is_new {
            new_devices += 1;
        }
        if is_changed {
            changed_devices += 1;
        }

        let Some(stored) = store.get_device_by_ip(&discovered.ip)? else {
            continue;
        };

        let ports: Vec<DevicePort> = discovered
            .open_ports
            .iter()
            .map(|port| DevicePort {
                device_id: stored.id,
                port: *port,
                protocol: "tcp".to_string(),
                service: discovered.services.get(port).cloned(),
                service_version: None,
                last_seen: now,
            })
            .collect();
        store.upsert_ports(stored.id, ports)?;

        // (f): a device that just became scan-eligible graduates out of
        // `discovered` so the Compliance Runner below picks it up.
        if stored.status == LifecycleStatus::Discovered && stored.is_scan_eligible() {
            store.update_status(stored.id, LifecycleStatus::Monitored)?;
        }
    }

    let mut devices_checked = 0usize;
    let mut passed = 0usize;
    let mut warned = 0usize;
    let mut failed = 0usize;

    for device in store.list_devices_for_scanning()? {
        let ports = store.get_ports(device.id)?;
        let results = CheckEngine::run_all(device.id, device.device_type, &ports);
        devices_checked += 1;

        let any_fail = results.iter().any(|r| r.outcome == CheckOutcome::Fail);
        let any_warn = results.iter().any(|r| r.outcome == CheckOutcome::Warn);
        let summary = if any_fail {
            failed += 1;
            ComplianceStatus::Drifted
        } else if any_warn {
            warned += 1;
            ComplianceStatus::Drifted
        } else {
            passed += 1;
            ComplianceStatus::Compliant
        };

        // A failing check is a host-level incident; Warn is left as
        // inventory drift for an operator to triage, not auto-remediated.
        if let Some(engine) = healing {
            for result in results.iter().filter(|r| r.outcome == CheckOutcome::Fail) {
                let raw_data = serde_json::json!({"check_type": result.check_type, "details": result.details});
                if let Err(e) = engine.heal(site_id, &device.ip.to_string(), &result.check_type, Severity::Medium, raw_data).await {
                    tracing::warn!(device_id = %device.id, check_type = %result.check_type, error = %e, "auto-healing invocation failed");
                }
            }
        }

        store.append_compliance_results(results)?;
        store.update_compliance_summary(device.id, summary)?;
    }

    let scan = store.complete_scan(scan.id, devices_found, new_devices, changed_devices, medical_excluded, None)?;

    Ok(ScanOutcome { scan, devices_checked, passed, warned, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use compliance_common::domain::{DiscoveredDevice, Origin};
    use compliance_discovery::DiscoveryResult;
    use std::net::{IpAddr, Ipv4Addr};

    struct StaticMethod(Vec<DiscoveredDevice>);

    #[async_trait]
    impl DiscoveryMethod for StaticMethod {
        fn name(&self) -> &str {
            "static"
        }

        async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
            Ok(self.0.clone())
        }
    }

    fn workstation(ip: &str) -> DiscoveredDevice {
        let mut d = DiscoveredDevice::new(IpAddr::V4(ip.parse::<Ipv4Addr>().unwrap()), Origin::Portscan);
        d.open_ports = vec![3389];
        d.hostname = Some("ws-01".into());
        d
    }

    #[tokio::test]
    async fn scan_upserts_classifies_and_checks_devices() {
        let store = Store::open_temporary().unwrap();
        let methods: Vec<Arc<dyn DiscoveryMethod>> = vec![Arc::new(StaticMethod(vec![workstation("10.0.0.10")]))];

        let outcome = run_scan(&store, &methods, vec!["10.0.0.0/24".into()], ScanType::Full, TriggerSource::Manual, None, "test-site")
            .await
            .unwrap();

        assert_eq!(outcome.scan.new_devices, 1);
        assert_eq!(outcome.devices_checked, 1);

        let device = store.get_device_by_ip(&IpAddr::V4("10.0.0.10".parse().unwrap())).unwrap().unwrap();
        assert_eq!(device.status, LifecycleStatus::Monitored);
        assert!(device.last_scan.is_some());
    }

    #[tokio::test]
    async fn scan_with_no_methods_errors() {
        let store = Store::open_temporary().unwrap();
        let methods: Vec<Arc<dyn DiscoveryMethod>> = vec![];
        let result = run_scan(&store, &methods, vec![], ScanType::Quick, TriggerSource::Api, None, "test-site").await;
        assert!(matches!(result, Err(OrchestratorError::NoDiscoveryMethods)));
    }
}
