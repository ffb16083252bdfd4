//! Evidence chain append and upload tracking.
//!
//! The store owns chain-position and chain-hash bookkeeping since it
//! holds the only durable view of "what was last appended". Signing
//! the bundle's contents is the caller's job (`compliance-evidence`
//! holds the Ed25519 key); by the time a bundle reaches here its
//! `signature` field is already populated.

use chrono::{DateTime, Utc};
use compliance_common::domain::UploadRecord;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use compliance_common::domain::EvidenceBundle;

use crate::codec::{decode_ivec, encode, require};
use crate::error::StoreResult;
use crate::Store;

const LAST_CHAIN_HASH_KEY: &[u8] = b"last_chain_hash";
const LAST_POSITION_KEY: &[u8] = b"last_position";
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn bundle_content_hash(bundle: &EvidenceBundle) -> StoreResult<String> {
    let canonical = serde_json::json!({
        "id": bundle.id,
        "site": bundle.site,
        "source": bundle.source,
        "reference": bundle.reference,
        "outcome": bundle.outcome,
        "timestamp": bundle.timestamp,
        "details": bundle.details,
        "signature": bundle.signature,
    });
    let bytes = serde_json::to_vec(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

impl Store {
    /// Append a signed bundle to the chain, assigning its position and
    /// chain hash. Returns the bundle with those fields filled in.
    pub fn append_evidence(&self, mut bundle: EvidenceBundle) -> StoreResult<EvidenceBundle> {
        let _guard = self.write_lock.lock();

        let prev_hash = match self.evidence_meta.get(LAST_CHAIN_HASH_KEY)? {
            Some(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            None => GENESIS_HASH.to_string(),
        };
        // Absence of `LAST_POSITION_KEY` means no bundle has ever been
        // appended, so the next position is 0 — distinct from "a
        // bundle already occupies position 0".
        let next_position = match self.evidence_meta.get(LAST_POSITION_KEY)? {
            Some(bytes) => decode_ivec::<u64>(&bytes)? + 1,
            None => 0,
        };

        bundle.chain_position = next_position;
        bundle.bundle_hash = bundle_content_hash(&bundle)?;

        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(bundle.bundle_hash.as_bytes());
        bundle.chain_hash = hex::encode(hasher.finalize());

        self.evidence.insert(bundle.id.as_bytes(), encode(&bundle)?)?;
        self.evidence_meta.insert(LAST_CHAIN_HASH_KEY, bundle.chain_hash.as_bytes())?;
        self.evidence_meta.insert(LAST_POSITION_KEY, encode(&bundle.chain_position)?)?;

        Ok(bundle)
    }

    pub fn get_evidence(&self, id: Uuid) -> StoreResult<Option<EvidenceBundle>> {
        match self.evidence.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_ivec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Full chain, in append order, for integrity verification.
    pub fn evidence_chain(&self) -> StoreResult<Vec<EvidenceBundle>> {
        let mut all = Vec::new();
        for item in self.evidence.iter() {
            let (_, bytes) = item?;
            all.push(decode_ivec::<EvidenceBundle>(&bytes)?);
        }
        all.sort_by_key(|b| b.chain_position);
        Ok(all)
    }

    pub fn register_upload(&self, bundle_id: Uuid, destinations: Vec<String>) -> StoreResult<UploadRecord> {
        let _guard = self.write_lock.lock();
        let record = UploadRecord {
            bundle_id,
            destinations,
            uploaded_at: None,
            retention_until: None,
            retry_count: 0,
            attempt: 0,
            last_error: None,
        };
        self.uploads.insert(bundle_id.as_bytes(), encode(&record)?)?;
        Ok(record)
    }

    pub fn get_upload(&self, bundle_id: Uuid) -> StoreResult<Option<UploadRecord>> {
        match self.uploads.get(bundle_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_ivec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record the outcome of one upload attempt. Idempotent re-upload
    /// of an already-succeeded bundle is a no-op at the caller level;
    /// this just appends the attempt's result.
    pub fn update_upload(
        &self,
        bundle_id: Uuid,
        succeeded: bool,
        retention_until: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> StoreResult<UploadRecord> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.uploads.get(bundle_id.as_bytes())?, "upload")?;
        let mut record: UploadRecord = decode_ivec(&bytes)?;
        record.attempt += 1;
        if succeeded {
            record.uploaded_at = Some(Utc::now());
            record.retention_until = retention_until;
            record.last_error = None;
        } else {
            record.retry_count += 1;
            record.last_error = error;
        }
        self.uploads.insert(bundle_id.as_bytes(), encode(&record)?)?;
        Ok(record)
    }

    pub fn list_pending_uploads(&self) -> StoreResult<Vec<UploadRecord>> {
        let mut pending = Vec::new();
        for item in self.uploads.iter() {
            let (_, bytes) = item?;
            let record: UploadRecord = decode_ivec(&bytes)?;
            if record.uploaded_at.is_none() {
                pending.push(record);
            }
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(site: &str) -> EvidenceBundle {
        EvidenceBundle {
            id: Uuid::new_v4(),
            site: site.into(),
            source: "compliance-runner".into(),
            reference: "device-1".into(),
            outcome: "drift_detected".into(),
            timestamp: Utc::now(),
            details: serde_json::json!({"check": "prohibited-ports"}),
            signature: "deadbeef".into(),
            chain_position: 0,
            bundle_hash: String::new(),
            chain_hash: String::new(),
            framework_tags: None,
        }
    }

    #[test]
    fn chain_positions_increment_and_link() {
        let store = Store::open_temporary().unwrap();
        let first = store.append_evidence(bundle("clinic-east")).unwrap();
        let second = store.append_evidence(bundle("clinic-east")).unwrap();
        let third = store.append_evidence(bundle("clinic-east")).unwrap();

        assert_eq!(first.chain_position, 0);
        assert_eq!(second.chain_position, 1);
        assert_eq!(third.chain_position, 2);
        assert_ne!(first.chain_hash, second.chain_hash);

        let mut hasher = Sha256::new();
        hasher.update(first.chain_hash.as_bytes());
        hasher.update(second.bundle_hash.as_bytes());
        assert_eq!(hex::encode(hasher.finalize()), second.chain_hash);

        let mut hasher = Sha256::new();
        hasher.update(second.chain_hash.as_bytes());
        hasher.update(third.bundle_hash.as_bytes());
        assert_eq!(hex::encode(hasher.finalize()), third.chain_hash);
    }

    #[test]
    fn upload_tracking_round_trips() {
        let store = Store::open_temporary().unwrap();
        let b = store.append_evidence(bundle("clinic-east")).unwrap();
        store.register_upload(b.id, vec!["central".into()]).unwrap();
        store.update_upload(b.id, false, None, Some("timeout".into())).unwrap();
        let after_failure = store.get_upload(b.id).unwrap().unwrap();
        assert_eq!(after_failure.retry_count, 1);
        assert!(after_failure.uploaded_at.is_none());

        store.update_upload(b.id, true, Some(Utc::now()), None).unwrap();
        let after_success = store.get_upload(b.id).unwrap().unwrap();
        assert!(after_success.uploaded_at.is_some());
        assert_eq!(after_success.attempt, 2);
    }
}
