//! Device, DevicePort, and note operations.

use chrono::Utc;
use compliance_common::domain::{Device, DevicePort, LifecycleStatus, ScanPolicy};
use uuid::Uuid;

use crate::codec::{decode_ivec, encode, require};
use crate::error::{StoreError, StoreResult};
use crate::Store;

fn ip_key(ip: &std::net::IpAddr) -> Vec<u8> {
    ip.to_string().into_bytes()
}

impl Store {
    /// Insert or update a device keyed by its IP. Returns
    /// `(is_new, is_changed)` where `is_changed` reflects a
    /// device_type change on update, mirroring the source system's
    /// contract. Enforces invariants I1/I3/I4 before writing.
    pub fn upsert_device(&self, mut device: Device) -> StoreResult<(bool, bool)> {
        let _guard = self.write_lock.lock();

        device.enforce_medical_invariant(); // I1
        if device.first_seen > device.last_seen {
            device.last_seen = device.first_seen; // I3
        }

        let key = ip_key(&device.ip);
        match self.devices_by_ip.get(&key)? {
            Some(existing_id) => {
                let existing: Device = decode_ivec(&self.devices.get(&existing_id)?.ok_or_else(|| {
                    StoreError::NotFound(format!("device {:?} indexed but missing", existing_id))
                })?)?;

                let is_changed = existing.device_type != device.device_type;

                device.id = existing.id;
                device.first_seen = existing.first_seen; // first_seen is immutable
                device.sync_version = existing.sync_version + 1; // I4
                device.synced_to_central = false; // I4
                device.notes = existing.notes.clone();

                self.devices.insert(device.id.as_bytes(), encode(&device)?)?;
                Ok((false, is_changed))
            }
            None => {
                device.sync_version = device.sync_version.max(1);
                device.synced_to_central = false;
                self.devices.insert(device.id.as_bytes(), encode(&device)?)?;
                self.devices_by_ip.insert(&key, device.id.as_bytes())?;
                Ok((true, false))
            }
        }
    }

    pub fn get_device_by_id(&self, id: Uuid) -> StoreResult<Option<Device>> {
        match self.devices.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_ivec(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_device_by_ip(&self, ip: &std::net::IpAddr) -> StoreResult<Option<Device>> {
        match self.devices_by_ip.get(ip_key(ip))? {
            Some(id_bytes) => match self.devices.get(&id_bytes)? {
                Some(bytes) => Ok(Some(decode_ivec(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// List devices, optionally filtered by type/status, paginated.
    pub fn list_devices(
        &self,
        device_type: Option<compliance_common::domain::DeviceType>,
        status: Option<LifecycleStatus>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Device>> {
        let mut matched = Vec::new();
        for item in self.devices.iter() {
            let (_, bytes) = item?;
            let device: Device = decode_ivec(&bytes)?;
            if let Some(t) = device_type {
                if device.device_type != t {
                    continue;
                }
            }
            if let Some(s) = status {
                if device.status != s {
                    continue;
                }
            }
            matched.push(device);
        }
        matched.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// Devices eligible for compliance scanning: applies invariant I2
    /// in a single pass (scan_policy != excluded, status == monitored,
    /// and not medical unless manually opted in).
    pub fn list_devices_for_scanning(&self) -> StoreResult<Vec<Device>> {
        let mut matched = Vec::new();
        for item in self.devices.iter() {
            let (_, bytes) = item?;
            let device: Device = decode_ivec(&bytes)?;
            if device.status == LifecycleStatus::Monitored && device.is_scan_eligible() {
                matched.push(device);
            }
        }
        matched.sort_by(|a, b| a.last_scan.cmp(&b.last_scan));
        Ok(matched)
    }

    pub fn list_unsynced_devices(&self) -> StoreResult<Vec<Device>> {
        let mut matched = Vec::new();
        for item in self.devices.iter() {
            let (_, bytes) = item?;
            let device: Device = decode_ivec(&bytes)?;
            if !device.synced_to_central {
                matched.push(device);
            }
        }
        Ok(matched)
    }

    pub fn mark_synced(&self, id: Uuid) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.devices.get(id.as_bytes())?, "device")?;
        let mut device: Device = decode_ivec(&bytes)?;
        device.synced_to_central = true;
        self.devices.insert(id.as_bytes(), encode(&device)?)?;
        Ok(())
    }

    pub fn update_status(&self, id: Uuid, status: LifecycleStatus) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.devices.get(id.as_bytes())?, "device")?;
        let mut device: Device = decode_ivec(&bytes)?;
        device.status = status;
        device.sync_version += 1; // I4
        device.synced_to_central = false;
        self.devices.insert(id.as_bytes(), encode(&device)?)?;
        Ok(())
    }

    /// Update scan policy / opt-in / PHI flag. Rejects any mutation
    /// that would violate I1, and caps a manually-opted-in medical
    /// device at `limited` (open question (c): never `standard`).
    pub fn update_policy(
        &self,
        id: Uuid,
        scan_policy: Option<ScanPolicy>,
        manually_opted_in: Option<bool>,
        phi_access_flag: Option<bool>,
    ) -> StoreResult<Device> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.devices.get(id.as_bytes())?, "device")?;
        let mut device: Device = decode_ivec(&bytes)?;

        if let Some(opted_in) = manually_opted_in {
            device.manually_opted_in = opted_in;
        }
        if let Some(policy) = scan_policy {
            device.scan_policy = policy;
        }
        if let Some(flag) = phi_access_flag {
            device.phi_access_flag = flag;
        }

        if device.medical_device && !device.manually_opted_in && device.scan_policy != ScanPolicy::Excluded {
            return Err(StoreError::MedicalInvariant);
        }
        if device.medical_device && device.manually_opted_in && device.scan_policy == ScanPolicy::Standard {
            device.scan_policy = ScanPolicy::Limited;
        }

        device.enforce_medical_invariant();
        device.sync_version += 1;
        device.synced_to_central = false;

        self.devices.insert(id.as_bytes(), encode(&device)?)?;
        Ok(device)
    }

    /// Recompute a device's rollup fields after a compliance run. Not
    /// itself transactional with `append_compliance_results` (callers
    /// invoke both under their own scan-level sequencing), but each
    /// call here is atomic and bumps sync_version per I4.
    pub fn update_compliance_summary(&self, id: Uuid, compliance_status: compliance_common::domain::ComplianceStatus) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.devices.get(id.as_bytes())?, "device")?;
        let mut device: Device = decode_ivec(&bytes)?;
        device.compliance_status = compliance_status;
        device.last_scan = Some(Utc::now());
        device.sync_version += 1;
        device.synced_to_central = false;
        self.devices.insert(id.as_bytes(), encode(&device)?)?;
        Ok(())
    }

    /// Merge-upsert ports (used by incremental discovery updates).
    pub fn upsert_ports(&self, device_id: Uuid, incoming: Vec<DevicePort>) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let mut existing: Vec<DevicePort> = match self.ports.get(device_id.as_bytes())? {
            Some(bytes) => decode_ivec(&bytes)?,
            None => Vec::new(),
        };
        for port in incoming {
            if let Some(slot) = existing
                .iter_mut()
                .find(|p| p.port == port.port && p.protocol == port.protocol)
            {
                *slot = port;
            } else {
                existing.push(port);
            }
        }
        self.ports.insert(device_id.as_bytes(), encode(&existing)?)?;
        Ok(())
    }

    /// Replace the full port set for a device (used by a complete scan).
    pub fn replace_ports_for_device(&self, device_id: Uuid, ports: Vec<DevicePort>) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.ports.insert(device_id.as_bytes(), encode(&ports)?)?;
        Ok(())
    }

    pub fn get_ports(&self, device_id: Uuid) -> StoreResult<Vec<DevicePort>> {
        match self.ports.get(device_id.as_bytes())? {
            Some(bytes) => decode_ivec(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub fn add_note(&self, device_id: Uuid, note: impl Into<String>) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.devices.get(device_id.as_bytes())?, "device")?;
        let mut device: Device = decode_ivec(&bytes)?;
        device.notes.push(format!("[{}] {}", Utc::now().to_rfc3339(), note.into()));
        self.devices.insert(device_id.as_bytes(), encode(&device)?)?;
        Ok(())
    }

    /// Cascading delete: ports, compliance rows, and notes. The core
    /// itself never calls this (devices are marked `offline`, never
    /// deleted) — it exists for an operator tool per the ownership
    /// note in the data model.
    pub fn delete_device(&self, id: Uuid) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        if let Some(bytes) = self.devices.get(id.as_bytes())? {
            let device: Device = decode_ivec(&bytes)?;
            self.devices_by_ip.remove(ip_key(&device.ip))?;
        }
        self.devices.remove(id.as_bytes())?;
        self.ports.remove(id.as_bytes())?;
        let prefix = id.as_bytes().to_vec();
        for item in self.compliance_results.scan_prefix(&prefix) {
            let (key, _) = item?;
            self.compliance_results.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_common::domain::{ComplianceStatus, DeviceType, Origin};
    use std::net::{IpAddr, Ipv4Addr};

    fn base_device(ip: &str) -> Device {
        let now = Utc::now();
        Device {
            id: Uuid::new_v4(),
            ip: IpAddr::V4(ip.parse::<Ipv4Addr>().unwrap()),
            hostname: None,
            mac: None,
            os_name: None,
            os_version: None,
            manufacturer: None,
            model: None,
            device_type: DeviceType::Workstation,
            scan_policy: ScanPolicy::Standard,
            status: LifecycleStatus::Discovered,
            compliance_status: ComplianceStatus::Unknown,
            medical_device: false,
            manually_opted_in: false,
            phi_access_flag: false,
            origin: Origin::Portscan,
            first_seen: now,
            last_seen: now,
            last_scan: None,
            sync_version: 0,
            synced_to_central: true,
            notes: Vec::new(),
            risk_score: None,
        }
    }

    #[test]
    fn upsert_reports_is_new_then_is_changed() {
        let store = Store::open_temporary().unwrap();
        let mut d = base_device("10.0.0.1");
        let (is_new, is_changed) = store.upsert_device(d.clone()).unwrap();
        assert!(is_new);
        assert!(!is_changed);

        d.device_type = DeviceType::Server;
        let (is_new, is_changed) = store.upsert_device(d).unwrap();
        assert!(!is_new);
        assert!(is_changed);
    }

    #[test]
    fn medical_without_optin_forces_exclusion() {
        let store = Store::open_temporary().unwrap();
        let mut d = base_device("10.0.0.2");
        d.medical_device = true;
        d.scan_policy = ScanPolicy::Standard;
        store.upsert_device(d.clone()).unwrap();

        let stored = store.get_device_by_ip(&d.ip).unwrap().unwrap();
        assert_eq!(stored.scan_policy, ScanPolicy::Excluded);
        assert_eq!(stored.status, LifecycleStatus::Excluded);
        assert_eq!(stored.compliance_status, ComplianceStatus::Excluded);
    }

    #[test]
    fn list_devices_for_scanning_never_returns_excluded() {
        let store = Store::open_temporary().unwrap();
        let mut excluded = base_device("10.0.0.3");
        excluded.medical_device = true;
        excluded.status = LifecycleStatus::Monitored;
        store.upsert_device(excluded).unwrap();

        let mut eligible = base_device("10.0.0.4");
        eligible.status = LifecycleStatus::Monitored;
        store.upsert_device(eligible.clone()).unwrap();

        let scannable = store.list_devices_for_scanning().unwrap();
        assert_eq!(scannable.len(), 1);
        assert_eq!(scannable[0].ip, eligible.ip);
    }

    #[test]
    fn manual_optin_caps_at_limited_not_standard() {
        let store = Store::open_temporary().unwrap();
        let mut d = base_device("10.0.0.5");
        d.medical_device = true;
        let (_, _) = store.upsert_device(d.clone()).unwrap();
        let stored = store.get_device_by_ip(&d.ip).unwrap().unwrap();

        let updated = store
            .update_policy(stored.id, Some(ScanPolicy::Standard), Some(true), None)
            .unwrap();
        assert_eq!(updated.scan_policy, ScanPolicy::Limited);
    }

    #[test]
    fn every_mutation_bumps_sync_version_and_clears_synced_flag() {
        let store = Store::open_temporary().unwrap();
        let d = base_device("10.0.0.6");
        store.upsert_device(d.clone()).unwrap();
        let stored = store.get_device_by_ip(&d.ip).unwrap().unwrap();
        store.mark_synced(stored.id).unwrap();

        store.update_status(stored.id, LifecycleStatus::Monitored).unwrap();
        let after = store.get_device_by_id(stored.id).unwrap().unwrap();
        assert!(!after.synced_to_central);
        assert!(after.sync_version > stored.sync_version);
    }
}
