//! Runbook Engine: definition loading, transport dispatch, phase
//! sequencing (detect -> remediate -> verify -> rollback).
//!
//! Grounded on `original_source/packages/compliance-agent/src/compliance_agent/runbooks/{linux,windows}/{executor,runbooks}.py`:
//! a target-OS-specific transport executes each phase's script and the
//! engine decides whether to continue, stop, or roll back.

pub mod error;
pub mod redact;
pub mod ssh;
pub mod winrm;

pub use error::{RunbookError, RunbookResult};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Which OS family a runbook targets; selects the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOs {
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Detect,
    Remediate,
    Verify,
    Rollback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Detect => "detect",
            Phase::Remediate => "remediate",
            Phase::Verify => "verify",
            Phase::Rollback => "rollback",
        }
    }
}

/// A runbook definition, loaded from `<runbooks_dir>/*.yaml`.
///
/// `remediate_variants` keys by distro (`ubuntu`, `rhel`) or is empty
/// for Windows runbooks, whose single `remediate` script always
/// applies. `detect`/`verify` never vary by distro in the source
/// catalog, so they carry no variant map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub target_os: TargetOs,
    pub hipaa_controls: Vec<String>,
    pub severity: String,
    pub detect_script: String,
    pub remediate_script: Option<String>,
    #[serde(default)]
    pub remediate_variants: HashMap<String, String>,
    pub verify_script: Option<String>,
    #[serde(default = "default_true")]
    pub requires_privilege: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff")]
    pub retry_backoff: f64,
    #[serde(default)]
    pub json_output: bool,
    #[serde(default)]
    pub rollback_script: Option<String>,
    #[serde(default = "default_true")]
    pub capture_pre_state: bool,
    #[serde(default = "default_true")]
    pub capture_post_state: bool,
}

fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    60
}
fn default_retries() -> u32 {
    2
}
fn default_backoff() -> f64 {
    1.5
}

impl RunbookDefinition {
    /// Script text for a phase, resolving the distro-specific
    /// remediate variant when one exists, falling back to the
    /// generic script.
    pub fn script_for(&self, phase: Phase, distro: Option<&str>) -> Option<&str> {
        match phase {
            Phase::Detect => Some(self.detect_script.as_str()),
            Phase::Verify => self.verify_script.as_deref().or(Some(self.detect_script.as_str())),
            Phase::Remediate => {
                if let Some(distro) = distro {
                    if let Some(script) = self.remediate_variants.get(distro) {
                        return Some(script.as_str());
                    }
                }
                self.remediate_script.as_deref()
            }
            Phase::Rollback => self.rollback_script.as_deref(),
        }
    }
}

/// Indexed collection of runbook definitions, loaded once at startup
/// and on explicit reload.
#[derive(Debug, Default)]
pub struct RunbookCatalog {
    definitions: HashMap<String, RunbookDefinition>,
}

impl RunbookCatalog {
    pub fn load(runbooks_dir: &Path) -> RunbookResult<Self> {
        let mut definitions = HashMap::new();
        let entries = std::fs::read_dir(runbooks_dir).map_err(|e| RunbookError::Load {
            path: runbooks_dir.display().to_string(),
            source_msg: e.to_string(),
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| RunbookError::Load { path: runbooks_dir.display().to_string(), source_msg: e.to_string() })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| RunbookError::Load { path: path.display().to_string(), source_msg: e.to_string() })?;
            let def: RunbookDefinition = serde_yaml::from_str(&raw)
                .map_err(|e| RunbookError::Load { path: path.display().to_string(), source_msg: e.to_string() })?;
            definitions.insert(def.id.clone(), def);
        }

        Ok(Self { definitions })
    }

    pub fn get(&self, id: &str) -> Option<&RunbookDefinition> {
        self.definitions.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Catalog shape consumed by the L2 planner prompt (§4.6): id,
    /// name, description, severity only — never scripts.
    pub fn catalog_summary(&self) -> Vec<serde_json::Value> {
        self.definitions
            .values()
            .map(|d| serde_json::json!({"id": d.id, "name": d.name, "description": d.description, "severity": d.severity}))
            .collect()
    }
}

/// Per-phase execution record, as `spec.md` §4.5 defines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub step: u32,
    pub action: String,
    pub script_hash: String,
    pub result: StepResult,
    pub exit_code: i32,
    pub stdout_excerpt: String,
    pub stderr_excerpt: String,
    pub error_message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Success,
    Partial,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub resolution_status: ResolutionStatus,
    pub mttr_seconds: f64,
    pub sla_met: bool,
    pub steps_executed: u32,
    pub steps_total: u32,
    pub steps: Vec<ActionStep>,
}

/// The maximum excerpt length for stdout/stderr in an ActionStep.
pub const EXCERPT_BYTES: usize = 500;

pub fn excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_BYTES {
        text.to_string()
    } else {
        let mut end = EXCERPT_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

pub fn script_hash(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    hex::encode(hasher.finalize())
}

/// True when a detect-phase stdout indicates no drift, per the
/// original executors' `"COMPLIANT"`/`not Drifted` short-circuit.
pub fn reports_compliant(stdout: &str) -> bool {
    let upper = stdout.to_uppercase();
    upper.contains("COMPLIANT") || upper.contains("\"DRIFTED\": FALSE") || upper.contains("\"DRIFTED\":FALSE")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_def() -> RunbookDefinition {
        RunbookDefinition {
            id: "LIN-SSH-001".into(),
            name: "Disable root SSH login".into(),
            description: "test".into(),
            target_os: TargetOs::Linux,
            hipaa_controls: vec!["164.312(a)(1)".into()],
            severity: "high".into(),
            detect_script: "detect.sh".into(),
            remediate_script: Some("generic.sh".into()),
            remediate_variants: HashMap::from([("rhel".to_string(), "rhel.sh".to_string())]),
            verify_script: None,
            requires_privilege: true,
            timeout_seconds: 60,
            retries: 2,
            retry_backoff: 1.5,
            json_output: false,
            rollback_script: None,
            capture_pre_state: true,
            capture_post_state: true,
        }
    }

    #[test]
    fn remediate_uses_distro_variant_when_present() {
        let def = sample_def();
        assert_eq!(def.script_for(Phase::Remediate, Some("rhel")), Some("rhel.sh"));
        assert_eq!(def.script_for(Phase::Remediate, Some("ubuntu")), Some("generic.sh"));
    }

    #[test]
    fn verify_falls_back_to_detect_script() {
        let def = sample_def();
        assert_eq!(def.script_for(Phase::Verify, None), Some("detect.sh"));
    }

    #[test]
    fn rollback_script_is_absent_unless_defined() {
        let def = sample_def();
        assert_eq!(def.script_for(Phase::Rollback, None), None);

        let with_rollback = RunbookDefinition { rollback_script: Some("undo.sh".into()), ..sample_def() };
        assert_eq!(with_rollback.script_for(Phase::Rollback, None), Some("undo.sh"));
    }

    #[test]
    fn excerpt_truncates_to_byte_budget() {
        let long = "x".repeat(1000);
        assert_eq!(excerpt(&long).len(), EXCERPT_BYTES);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn reports_compliant_matches_known_markers() {
        assert!(reports_compliant("status: COMPLIANT"));
        assert!(reports_compliant(r#"{"Drifted": false}"#));
        assert!(!reports_compliant(r#"{"Drifted": true}"#));
    }
}
