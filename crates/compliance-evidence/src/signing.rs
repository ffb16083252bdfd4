//! Ed25519 signing over the unsigned fields of an evidence bundle.
//!
//! The signing key lives at `paths.signing_key`, generated on first
//! boot if absent. Losing it means prior signatures can still be
//! verified (the public key travels with the appliance's evidence
//! exports) but no new bundle can be signed until it's restored from
//! backup or regenerated, which operators are expected to treat as a
//! chain-of-custody event.

use compliance_store::evidence::EvidenceBundle;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{EvidenceError, EvidenceResult};

pub struct BundleSigner {
    key: SigningKey,
}

/// Bytes that get signed: every bundle field the signer controls,
/// excluding the signature and chain bookkeeping the store assigns
/// afterward.
fn signable_bytes(bundle: &EvidenceBundle) -> EvidenceResult<Vec<u8>> {
    let canonical = serde_json::json!({
        "id": bundle.id,
        "site": bundle.site,
        "source": bundle.source,
        "reference": bundle.reference,
        "outcome": bundle.outcome,
        "timestamp": bundle.timestamp,
        "details": bundle.details,
    });
    serde_json::to_vec(&canonical).map_err(|e| EvidenceError::Signing(e.to_string()))
}

impl BundleSigner {
    /// Loads the raw 32-byte key at `path`, generating and persisting
    /// a fresh one if the file doesn't exist yet.
    pub fn load_or_generate(path: &Path) -> EvidenceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EvidenceError::Signing(e.to_string()))?;
        }

        let key = match std::fs::read(path) {
            Ok(bytes) => {
                let raw: [u8; 32] = bytes.try_into().map_err(|_| EvidenceError::Signing(format!("signing key at {} is not 32 bytes", path.display())))?;
                SigningKey::from_bytes(&raw)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = SigningKey::generate(&mut OsRng);
                write_key_file(path, &key)?;
                key
            }
            Err(e) => return Err(EvidenceError::Signing(e.to_string())),
        };

        Ok(Self { key })
    }

    pub fn verifying_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Signs the bundle's unsigned fields, writing the hex signature
    /// into `bundle.signature`.
    pub fn sign(&self, bundle: &mut EvidenceBundle) -> EvidenceResult<()> {
        let bytes = signable_bytes(bundle)?;
        let signature = self.key.sign(&bytes);
        bundle.signature = hex::encode(signature.to_bytes());
        Ok(())
    }
}

/// Verifies a bundle's signature against a known public key, used by
/// export auditors who never hold the private key.
pub fn verify_bundle(verifying_key_hex: &str, bundle: &EvidenceBundle) -> EvidenceResult<bool> {
    let key_bytes: [u8; 32] = hex::decode(verifying_key_hex)
        .map_err(|e| EvidenceError::Signing(e.to_string()))?
        .try_into()
        .map_err(|_| EvidenceError::Signing("verifying key is not 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|e| EvidenceError::Signing(e.to_string()))?;

    let sig_bytes: [u8; 64] = hex::decode(&bundle.signature)
        .map_err(|e| EvidenceError::Signing(e.to_string()))?
        .try_into()
        .map_err(|_| EvidenceError::Signing("signature is not 64 bytes".into()))?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);

    let bytes = signable_bytes(bundle)?;
    Ok(verifying_key.verify(&bytes, &signature).is_ok())
}

fn write_key_file(path: &Path, key: &SigningKey) -> EvidenceResult<()> {
    std::fs::write(path, key.to_bytes()).map_err(|e| EvidenceError::Signing(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms).map_err(|e| EvidenceError::Signing(e.to_string()))?;
    }
    Ok(())
}

/// Content hash of the bundle's artifact list, recorded separately
/// from the bundle-level `bundle_hash` the store assigns so a
/// truncated upload is detectable without re-deriving the whole
/// canonical bundle.
pub fn artifact_digest(details: &serde_json::Value) -> EvidenceResult<String> {
    let bytes = serde_json::to_vec(details).map_err(|e| EvidenceError::Signing(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn bundle() -> EvidenceBundle {
        EvidenceBundle {
            id: Uuid::new_v4(),
            site: "clinic-east".into(),
            source: "compliance-healing".into(),
            reference: "host-01".into(),
            outcome: "success".into(),
            timestamp: Utc::now(),
            details: serde_json::json!({"runbook_id": "LIN-SVC-001"}),
            signature: String::new(),
            chain_position: 0,
            bundle_hash: String::new(),
            chain_hash: String::new(),
            framework_tags: None,
        }
    }

    fn signer(dir: &std::path::Path) -> BundleSigner {
        BundleSigner::load_or_generate(&dir.join("signing_key")).unwrap()
    }

    #[test]
    fn generates_and_persists_a_key_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("signing_key");
        assert!(!key_path.exists());
        let _ = signer(dir.path());
        assert!(key_path.exists());
    }

    #[test]
    fn reloading_the_same_path_produces_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let first = signer(dir.path());
        let second = signer(dir.path());
        assert_eq!(first.verifying_key_hex(), second.verifying_key_hex());
    }

    #[test]
    fn signature_verifies_against_the_matching_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let s = signer(dir.path());
        let mut b = bundle();
        s.sign(&mut b).unwrap();
        assert!(verify_bundle(&s.verifying_key_hex(), &b).unwrap());
    }

    #[test]
    fn tampering_with_details_invalidates_the_signature() {
        let dir = tempfile::tempdir().unwrap();
        let s = signer(dir.path());
        let mut b = bundle();
        s.sign(&mut b).unwrap();
        b.details = serde_json::json!({"runbook_id": "LIN-SVC-999"});
        assert!(!verify_bundle(&s.verifying_key_hex(), &b).unwrap());
    }
}
