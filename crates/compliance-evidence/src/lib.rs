//! Evidence & WORM Replication: assemble a signed, hash-chained
//! `EvidenceBundle` from every runbook execution and replicate it to
//! immutable storage, proxied through the control plane or direct to
//! an object-storage endpoint.

pub mod assembly;
pub mod error;
pub mod replicator;
pub mod signing;

pub use assembly::{assemble_bundle, ExecutionMetadata};
pub use error::{EvidenceError, EvidenceResult};
pub use replicator::{ReplicatorConfig, UploadOutcome, WormReplicator};
pub use signing::BundleSigner;

use compliance_common::domain::Incident;
use compliance_runbooks::{RunResult, RunbookDefinition};
use compliance_store::evidence::EvidenceBundle;
use compliance_store::Store;
use std::collections::HashMap;

/// Ties assembly, signing, and chain-append into the single call site
/// a runbook execution makes once it has a result in hand.
pub struct EvidencePipeline {
    store: Store,
    signer: BundleSigner,
    replicator: Option<WormReplicator>,
}

impl EvidencePipeline {
    pub fn new(store: Store, signer: BundleSigner, replicator: Option<WormReplicator>) -> Self {
        Self { store, signer, replicator }
    }

    /// Assembles, signs, chains, and (if WORM replication is enabled)
    /// registers the bundle as pending upload. Returns the bundle with
    /// its chain position, bundle hash, and chain hash filled in.
    pub fn record(
        &self,
        incident: &Incident,
        runbook: &RunbookDefinition,
        run_result: &RunResult,
        execution: &ExecutionMetadata,
        source: &str,
        framework_tags: Option<HashMap<String, Vec<String>>>,
    ) -> EvidenceResult<EvidenceBundle> {
        let mut bundle = assemble_bundle(incident, runbook, run_result, execution, source, framework_tags);
        self.signer.sign(&mut bundle)?;
        let appended = self.store.append_evidence(bundle)?;

        if let Some(replicator) = &self.replicator {
            replicator.register(&self.store, appended.id)?;
        }

        Ok(appended)
    }

    /// Drives one replication sweep over every pending bundle. A
    /// no-op, returning an empty list, when WORM replication is off.
    pub async fn replicate_pending(&self) -> EvidenceResult<Vec<UploadOutcome>> {
        match &self.replicator {
            Some(replicator) => replicator.replicate_pending(&self.store).await,
            None => Ok(vec![]),
        }
    }

    pub fn verifying_key_hex(&self) -> String {
        self.signer.verifying_key_hex()
    }

    /// Full chain, for integrity audits and evidence exports.
    pub fn chain(&self) -> EvidenceResult<Vec<EvidenceBundle>> {
        Ok(self.store.evidence_chain()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use compliance_common::domain::Severity;
    use compliance_runbooks::{ActionStep, ResolutionStatus, StepResult, TargetOs};
    use uuid::Uuid;

    fn pipeline(dir: &std::path::Path) -> EvidencePipeline {
        let store = Store::open_temporary().unwrap();
        let signer = BundleSigner::load_or_generate(&dir.join("signing_key")).unwrap();
        EvidencePipeline::new(store, signer, None)
    }

    fn incident() -> Incident {
        Incident {
            id: Uuid::new_v4(),
            site: "clinic-east".into(),
            host: "host-01".into(),
            incident_type: "service_down".into(),
            severity: Severity::High,
            raw_data: serde_json::json!({}),
            pattern_signature: "sig".into(),
            created_at: Utc::now(),
            level: None,
            action: None,
            outcome: None,
            resolved_at: None,
            human_feedback: None,
        }
    }

    fn runbook() -> RunbookDefinition {
        RunbookDefinition {
            id: "LIN-SVC-001".into(),
            name: "restart nginx".into(),
            description: "restarts the nginx service".into(),
            target_os: TargetOs::Linux,
            hipaa_controls: vec![],
            detect_script: "systemctl is-active nginx".into(),
            remediate_script: Some("systemctl restart nginx".into()),
            remediate_variants: Default::default(),
            verify_script: Some("systemctl is-active nginx".into()),
            requires_privilege: true,
            timeout_seconds: 60,
            retries: 2,
            retry_backoff: 1.5,
            json_output: false,
            rollback_script: None,
            capture_pre_state: true,
            capture_post_state: true,
            severity: "high".into(),
        }
    }

    fn run_result() -> RunResult {
        RunResult {
            resolution_status: ResolutionStatus::Success,
            mttr_seconds: 10.0,
            sla_met: true,
            steps_executed: 1,
            steps_total: 1,
            steps: vec![ActionStep {
                step: 1,
                action: "remediate".into(),
                script_hash: "hash".into(),
                result: StepResult::Ok,
                exit_code: 0,
                stdout_excerpt: String::new(),
                stderr_excerpt: String::new(),
                error_message: None,
                timestamp: Utc::now(),
            }],
        }
    }

    #[test]
    fn record_signs_and_chains_a_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let execution = ExecutionMetadata { operator: "automated".into(), started_at: Utc::now(), ended_at: Utc::now() };

        let bundle = pipeline.record(&incident(), &runbook(), &run_result(), &execution, "compliance-healing", None).unwrap();

        assert_eq!(bundle.chain_position, 0);
        assert!(!bundle.signature.is_empty());
        assert!(!bundle.chain_hash.is_empty());
        assert!(signing::verify_bundle(&pipeline.verifying_key_hex(), &bundle).unwrap());
    }

    #[test]
    fn successive_bundles_extend_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let execution = ExecutionMetadata { operator: "automated".into(), started_at: Utc::now(), ended_at: Utc::now() };

        let first = pipeline.record(&incident(), &runbook(), &run_result(), &execution, "compliance-healing", None).unwrap();
        let second = pipeline.record(&incident(), &runbook(), &run_result(), &execution, "compliance-healing", None).unwrap();

        assert_eq!(second.chain_position, first.chain_position + 1);
        assert_eq!(pipeline.chain().unwrap().len(), 2);
    }
}
