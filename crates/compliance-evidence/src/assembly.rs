//! Step 1 of the evidence pipeline: combine an incident, the runbook
//! that ran, and its `RunResult` into an unsigned `EvidenceBundle`.

use chrono::{DateTime, Utc};
use compliance_common::domain::Incident;
use compliance_runbooks::{script_hash, RunResult, RunbookDefinition};
use compliance_store::evidence::EvidenceBundle;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    pub operator: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Runbook identity as recorded in the bundle: id/name plus the
/// on-disk hash of every script phase it carries, standing in for a
/// version number since runbook YAML files carry none.
fn runbook_fingerprint(def: &RunbookDefinition) -> serde_json::Value {
    serde_json::json!({
        "id": def.id,
        "name": def.name,
        "detect_script_hash": script_hash(&def.detect_script),
        "remediate_script_hash": def.remediate_script.as_deref().map(script_hash),
        "verify_script_hash": def.verify_script.as_deref().map(script_hash),
        "hipaa_controls": def.hipaa_controls,
    })
}

/// Builds the unsigned bundle. The caller signs it (`BundleSigner`)
/// and then hands it to `Store::append_evidence`, which assigns the
/// chain position and hash.
pub fn assemble_bundle(
    incident: &Incident,
    runbook: &RunbookDefinition,
    run_result: &RunResult,
    execution: &ExecutionMetadata,
    source: &str,
    framework_tags: Option<HashMap<String, Vec<String>>>,
) -> EvidenceBundle {
    let details = serde_json::json!({
        "incident_id": incident.id,
        "incident_type": incident.incident_type,
        "host": incident.host,
        "severity": incident.severity,
        "runbook": runbook_fingerprint(runbook),
        "execution": {
            "operator": execution.operator,
            "started_at": execution.started_at,
            "ended_at": execution.ended_at,
            "mttr_seconds": run_result.mttr_seconds,
            "sla_met": run_result.sla_met,
        },
        "steps_executed": run_result.steps_executed,
        "steps_total": run_result.steps_total,
        "steps": run_result.steps,
    });

    EvidenceBundle {
        id: Uuid::new_v4(),
        site: incident.site.clone(),
        source: source.to_string(),
        reference: incident.host.clone(),
        outcome: resolution_outcome(run_result),
        timestamp: execution.ended_at,
        details,
        signature: String::new(),
        chain_position: 0,
        bundle_hash: String::new(),
        chain_hash: String::new(),
        framework_tags,
    }
}

fn resolution_outcome(run_result: &RunResult) -> String {
    match run_result.resolution_status {
        compliance_runbooks::ResolutionStatus::Success => "success".to_string(),
        compliance_runbooks::ResolutionStatus::Partial => "partial".to_string(),
        compliance_runbooks::ResolutionStatus::RolledBack => "rolled_back".to_string(),
        compliance_runbooks::ResolutionStatus::Failed => "failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_common::domain::Severity;
    use compliance_runbooks::{ActionStep, ResolutionStatus, StepResult, TargetOs};

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
            hipaa_controls: vec!["164.312(c)(1)".into()],
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
            mttr_seconds: 12.5,
            sla_met: true,
            steps_executed: 3,
            steps_total: 3,
            steps: vec![ActionStep {
                step: 1,
                action: "detect".into(),
                script_hash: script_hash("systemctl is-active nginx"),
                result: StepResult::Ok,
                exit_code: 0,
                stdout_excerpt: "active".into(),
                stderr_excerpt: String::new(),
                error_message: None,
                timestamp: Utc::now(),
            }],
        }
    }

    #[test]
    fn assembles_bundle_with_runbook_fingerprint_and_steps() {
        let incident = incident();
        let runbook = runbook();
        let run_result = run_result();
        let execution = ExecutionMetadata { operator: "automated".into(), started_at: Utc::now(), ended_at: Utc::now() };

        let bundle = assemble_bundle(&incident, &runbook, &run_result, &execution, "compliance-healing", None);

        assert_eq!(bundle.site, "clinic-east");
        assert_eq!(bundle.reference, "host-01");
        assert_eq!(bundle.outcome, "success");
        assert_eq!(bundle.details["runbook"]["id"], "LIN-SVC-001");
        assert_eq!(bundle.details["steps"].as_array().unwrap().len(), 1);
        assert!(bundle.signature.is_empty());
        assert_eq!(bundle.chain_position, 0);
    }
}
