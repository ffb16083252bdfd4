//! Scan lifecycle and compliance result history.

use chrono::Utc;
use compliance_common::domain::{ComplianceCheckResult, Scan, ScanStatus, ScanType, TriggerSource};
use uuid::Uuid;

use crate::codec::{decode_ivec, encode, require};
use crate::error::StoreResult;
use crate::Store;

impl Store {
    pub fn create_scan(
        &self,
        scan_type: ScanType,
        methods: Vec<String>,
        network_ranges: Vec<String>,
        trigger: TriggerSource,
    ) -> StoreResult<Scan> {
        let scan = Scan {
            id: Uuid::new_v4(),
            scan_type,
            status: ScanStatus::Running,
            devices_found: 0,
            new_devices: 0,
            changed_devices: 0,
            medical_excluded: 0,
            methods,
            network_ranges,
            trigger,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        };
        self.scans.insert(scan.id.as_bytes(), encode(&scan)?)?;
        Ok(scan)
    }

    /// Record final scan counters and mark completed/failed.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_scan(
        &self,
        id: Uuid,
        devices_found: u32,
        new_devices: u32,
        changed_devices: u32,
        medical_excluded: u32,
        error: Option<String>,
    ) -> StoreResult<Scan> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.scans.get(id.as_bytes())?, "scan")?;
        let mut scan: Scan = decode_ivec(&bytes)?;
        scan.devices_found = devices_found;
        scan.new_devices = new_devices;
        scan.changed_devices = changed_devices;
        scan.medical_excluded = medical_excluded;
        scan.ended_at = Some(Utc::now());
        scan.status = if error.is_some() { ScanStatus::Failed } else { ScanStatus::Completed };
        scan.error = error;
        self.scans.insert(id.as_bytes(), encode(&scan)?)?;
        Ok(scan)
    }

    pub fn get_scan(&self, id: Uuid) -> StoreResult<Option<Scan>> {
        match self.scans.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_ivec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Most recent scans, newest first — the short history behind
    /// `GET /api/scans/status`.
    pub fn recent_scans(&self, limit: usize) -> StoreResult<Vec<Scan>> {
        let mut all = Vec::new();
        for item in self.scans.iter() {
            let (_, bytes) = item?;
            all.push(decode_ivec::<Scan>(&bytes)?);
        }
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.truncate(limit);
        Ok(all)
    }

    /// Append compliance results for a device's most recent scan.
    /// Key is `device_id ++ result_id` so history is prefix-scannable
    /// per device and results are intrinsically ordered by insertion.
    pub fn append_compliance_results(&self, results: Vec<ComplianceCheckResult>) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        for result in results {
            let mut key = result.device_id.as_bytes().to_vec();
            key.extend_from_slice(result.id.as_bytes());
            self.compliance_results.insert(key, encode(&result)?)?;
        }
        Ok(())
    }

    /// Full compliance history for a device, oldest first.
    pub fn list_compliance_history(&self, device_id: Uuid) -> StoreResult<Vec<ComplianceCheckResult>> {
        let mut out = Vec::new();
        for item in self.compliance_results.scan_prefix(device_id.as_bytes()) {
            let (_, bytes) = item?;
            out.push(decode_ivec(&bytes)?);
        }
        out.sort_by(|a: &ComplianceCheckResult, b: &ComplianceCheckResult| a.checked_at.cmp(&b.checked_at));
        Ok(out)
    }

    /// The most recent result per check_type for a device — what
    /// drives `Device.compliance_status` recomputation after a scan.
    pub fn latest_compliance_results(&self, device_id: Uuid) -> StoreResult<Vec<ComplianceCheckResult>> {
        let history = self.list_compliance_history(device_id)?;
        let mut latest: std::collections::HashMap<String, ComplianceCheckResult> = std::collections::HashMap::new();
        for result in history {
            latest.insert(result.check_type.clone(), result);
        }
        Ok(latest.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_common::domain::CheckOutcome;

    #[test]
    fn complete_scan_without_error_marks_completed() {
        let store = Store::open_temporary().unwrap();
        let scan = store
            .create_scan(ScanType::Full, vec!["portscan".into()], vec!["10.0.0.0/24".into()], TriggerSource::Scheduled)
            .unwrap();
        let completed = store.complete_scan(scan.id, 10, 2, 1, 0, None).unwrap();
        assert_eq!(completed.status, ScanStatus::Completed);
        assert!(completed.ended_at.is_some());
    }

    #[test]
    fn complete_scan_with_error_marks_failed() {
        let store = Store::open_temporary().unwrap();
        let scan = store.create_scan(ScanType::Quick, vec![], vec![], TriggerSource::Api).unwrap();
        let completed = store.complete_scan(scan.id, 0, 0, 0, 0, Some("timeout".into())).unwrap();
        assert_eq!(completed.status, ScanStatus::Failed);
        assert_eq!(completed.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn compliance_history_is_scoped_per_device_and_ordered() {
        let store = Store::open_temporary().unwrap();
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();
        let mk = |device_id: Uuid, checked_at: chrono::DateTime<Utc>| ComplianceCheckResult {
            id: Uuid::new_v4(),
            device_id,
            check_type: "prohibited-ports".into(),
            control: None,
            control_family: None,
            outcome: CheckOutcome::Pass,
            details: serde_json::json!({}),
            checked_at,
        };
        let t0 = Utc::now();
        store
            .append_compliance_results(vec![
                mk(device_a, t0),
                mk(device_b, t0),
                mk(device_a, t0 + chrono::Duration::seconds(5)),
            ])
            .unwrap();

        let history = store.list_compliance_history(device_a).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].checked_at <= history[1].checked_at);
    }
}
