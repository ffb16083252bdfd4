//! Auto-Healing Decision Engine: suppression -> flap -> L1 -> L2 -> L3,
//! with a safety envelope wrapped around every execution and a
//! learning loop that promotes proven L2 patterns into L1 rules.

pub mod condition;
pub mod error;
pub mod learning;
pub mod provider;
pub mod rules;
pub mod safety;

pub use error::{HealingError, HealingResult};

use chrono::{DateTime, Utc};
use compliance_common::config::HealingConfig;
use compliance_common::domain::{Incident, IncidentLevel, IncidentOutcome, Severity};
use compliance_evidence::{EvidencePipeline, ExecutionMetadata};
use compliance_runbooks::ssh::{LinuxTarget, SshTransport};
use compliance_runbooks::winrm::{WindowsTarget, WinrmTransport};
use compliance_runbooks::{RunbookCatalog, TargetOs};
use compliance_store::Store;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::learning::PromotionThresholds;
use crate::rules::L1RuleEngine;
use crate::safety::exceptions::ExceptionScope;
use crate::safety::SafetyEnvelope;

/// Resolves which concrete target (with its own transport
/// credentials) a host corresponds to. Left to the caller: the
/// healing engine only knows hosts and OS family, never how to reach
/// them, the same separation `compliance-runbooks` draws.
pub trait TargetResolver: Send + Sync {
    fn resolve_linux(&self, site: &str, host: &str) -> Option<LinuxTarget>;
    fn resolve_windows(&self, site: &str, host: &str) -> Option<WindowsTarget>;
}

impl From<&HealingConfig> for PromotionThresholds {
    fn from(config: &HealingConfig) -> Self {
        PromotionThresholds {
            min_occurrences: config.promotion_min_occurrences,
            min_l2_resolutions: config.promotion_min_l2,
            min_success_rate: config.promotion_min_success,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealOutcome {
    pub incident_id: Uuid,
    pub success: bool,
    pub escalated: bool,
    pub level: Option<IncidentLevel>,
    pub action: Option<String>,
    pub action_params: Option<Value>,
}

struct FlapWindow {
    count: u32,
    window_start: DateTime<Utc>,
}

pub struct HealingEngine {
    store: Store,
    catalog: RunbookCatalog,
    rule_engine: L1RuleEngine,
    l2_planner: Option<provider::L2Planner>,
    safety: SafetyEnvelope,
    target_resolver: Box<dyn TargetResolver>,
    ssh: SshTransport,
    winrm: WinrmTransport,
    config: HealingConfig,
    flap_tracker: DashMap<(String, String, String), FlapWindow>,
    evidence: Option<Arc<EvidencePipeline>>,
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::High => "high",
        Severity::Medium => "medium",
        Severity::Low => "low",
    }
}

/// Windows-flavored incident types route to the WinRM transport;
/// everything else is assumed POSIX.
fn infer_platform(incident_type: &str) -> TargetOs {
    let lowered = incident_type.to_lowercase();
    if lowered.contains("windows") || lowered.contains("win_") || lowered.starts_with("win-") {
        TargetOs::Windows
    } else {
        TargetOs::Linux
    }
}

#[allow(clippy::too_many_arguments)]
impl HealingEngine {
    pub fn new(
        store: Store,
        catalog: RunbookCatalog,
        rule_engine: L1RuleEngine,
        l2_planner: Option<provider::L2Planner>,
        safety: SafetyEnvelope,
        target_resolver: Box<dyn TargetResolver>,
        config: HealingConfig,
        max_ssh_session_age_seconds: u64,
        max_winrm_shell_age_seconds: u64,
        evidence: Option<Arc<EvidencePipeline>>,
    ) -> Self {
        Self {
            store,
            catalog,
            rule_engine,
            l2_planner,
            safety,
            target_resolver,
            ssh: SshTransport::new(max_ssh_session_age_seconds),
            winrm: WinrmTransport::new(max_winrm_shell_age_seconds),
            config,
            flap_tracker: DashMap::new(),
            evidence,
        }
    }

    pub async fn heal(&self, site: &str, host: &str, incident_type: &str, severity: Severity, raw_data: Value) -> HealingResult<HealOutcome> {
        let validation = self.safety.validator.validate_incident(site, host, incident_type, severity_str(severity), &raw_data);
        if !validation.is_valid {
            return Err(HealingError::Validation(validation.errors));
        }

        let check_context = raw_data.get("check_type").and_then(Value::as_str).unwrap_or("");
        let error_text = raw_data.get("error").and_then(Value::as_str).unwrap_or("");
        let pattern_signature = compliance_common::pattern::pattern_signature(incident_type, check_context, error_text);

        let incident = self.store.create_incident(
            site.to_string(),
            host.to_string(),
            incident_type.to_string(),
            severity,
            raw_data.clone(),
            pattern_signature.clone(),
        )?;

        if self.store.is_flap_suppressed(site, host, incident_type)? {
            self.store.resolve_incident(incident.id, IncidentLevel::L3, Some("flap_suppressed_awaiting_human".into()), IncidentOutcome::Suppressed, None, false)?;
            return Ok(HealOutcome {
                incident_id: incident.id,
                success: false,
                escalated: true,
                level: Some(IncidentLevel::L3),
                action: Some("flap_suppressed_awaiting_human".into()),
                action_params: None,
            });
        }

        if self.flap_count(site, host, incident_type) >= self.config.flap_threshold {
            self.store.record_flap_suppression(site.to_string(), host.to_string(), incident_type.to_string(), format!("{} occurrences within {}m", self.config.flap_threshold, self.config.flap_window_minutes))?;
            self.store.resolve_incident(incident.id, IncidentLevel::L3, Some("flap_detected_escalation".into()), IncidentOutcome::Escalated, None, false)?;
            return Ok(HealOutcome {
                incident_id: incident.id,
                success: false,
                escalated: true,
                level: Some(IncidentLevel::L3),
                action: Some("flap_detected_escalation".into()),
                action_params: None,
            });
        }

        if self.safety.exceptions.should_skip_remediation(site, ExceptionScope::Check, incident_type, host, None) {
            self.store.resolve_incident(incident.id, IncidentLevel::L3, Some("exception_skips_remediation".into()), IncidentOutcome::Suppressed, None, false)?;
            return Ok(HealOutcome {
                incident_id: incident.id,
                success: false,
                escalated: false,
                level: None,
                action: Some("exception_skips_remediation".into()),
                action_params: None,
            });
        }

        let platform = infer_platform(incident_type);

        if self.config.level1_enabled {
            if let Some(rule) = self.rule_engine.try_match(site, host, &raw_data) {
                let rule_id = rule.id.clone();
                let action = rule.action.clone();
                let action_params = rule.action_params.clone();
                let started_at = Utc::now();
                match self.execute_with_envelope(site, host, &action, &action_params, platform).await {
                    Ok(run_result) => {
                        self.rule_engine.record_fired(&rule_id, site, host);
                        let outcome = self.finish_execution(&incident, &pattern_signature, IncidentLevel::L1, action, action_params, run_result, started_at).await?;
                        if outcome.success {
                            self.record_flap_success(site, host, incident_type);
                        }
                        return Ok(outcome);
                    }
                    Err(e) => {
                        tracing::warn!(rule = %rule_id, error = %e, "L1 rule matched but execution was blocked by the safety envelope");
                    }
                }
            }
        }

        if self.config.level2_enabled {
            if let Some(planner) = &self.l2_planner {
                let catalog_summary = self.catalog.catalog_summary();
                let decision = planner.analyze(site, host, incident_type, severity_str(severity), &raw_data, &catalog_summary).await;

                let decision_signature = compliance_common::pattern::decision_pattern_signature(
                    incident_type,
                    check_context,
                    decision.runbook_id.as_deref().unwrap_or("none"),
                );
                tracing::info!(
                    incident_id = %incident.id,
                    decision_signature = %decision_signature,
                    confidence = decision.confidence,
                    "L2 decision recorded"
                );

                if decision.eligible_for_execution() {
                    let runbook_id = decision.runbook_id.clone().unwrap();
                    let started_at = Utc::now();
                    match self.execute_with_envelope(site, host, &runbook_id, &Value::Null, platform).await {
                        Ok(run_result) => {
                            let outcome = self.finish_execution(&incident, &pattern_signature, IncidentLevel::L2, runbook_id, Value::Null, run_result, started_at).await?;
                            if outcome.success {
                                self.record_flap_success(site, host, incident_type);
                            }
                            return Ok(outcome);
                        }
                        Err(e) => {
                            tracing::warn!(runbook = %runbook_id, error = %e, "L2 decision blocked by the safety envelope");
                        }
                    }
                }
            }
        }

        self.store.resolve_incident(incident.id, IncidentLevel::L3, Some("escalated_to_human".into()), IncidentOutcome::Escalated, None, false)?;
        Ok(HealOutcome {
            incident_id: incident.id,
            success: false,
            escalated: true,
            level: Some(IncidentLevel::L3),
            action: Some("escalated_to_human".into()),
            action_params: None,
        })
    }

    /// Current occurrence count within the rolling window, expiring a
    /// stale window first. A pure check — raw incident arrivals never
    /// advance this count, only `record_flap_success` does (§4.6 step
    /// 4 checks the count, step 5 bumps it on a successful execution).
    fn flap_count(&self, site: &str, host: &str, incident_type: &str) -> u32 {
        let key = (site.to_string(), host.to_string(), incident_type.to_string());
        let now = Utc::now();
        let mut entry = self.flap_tracker.entry(key).or_insert_with(|| FlapWindow { count: 0, window_start: now });
        if (now - entry.window_start).num_minutes() >= self.config.flap_window_minutes {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count
    }

    /// Advances the flap counter after a successful L1/L2 execution.
    fn record_flap_success(&self, site: &str, host: &str, incident_type: &str) {
        let key = (site.to_string(), host.to_string(), incident_type.to_string());
        let now = Utc::now();
        let mut entry = self.flap_tracker.entry(key).or_insert_with(|| FlapWindow { count: 0, window_start: now });
        if (now - entry.window_start).num_minutes() >= self.config.flap_window_minutes {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
    }

    async fn execute_with_envelope(
        &self,
        site: &str,
        host: &str,
        action: &str,
        action_params: &Value,
        platform: TargetOs,
    ) -> HealingResult<compliance_runbooks::RunResult> {
        if let Err(errors) = self.safety.whitelist.validate(action, action_params) {
            return Err(HealingError::ParameterRejected { action: action.to_string(), param: errors.join("; ") });
        }

        let circuit = self.safety.circuit_for(action);
        if circuit.is_open() {
            return Err(HealingError::CircuitOpen { path: action.to_string() });
        }
        drop(circuit);

        let rate = self.safety.rate_limiter.check_and_record(site, site, host, action).await;
        if !rate.allowed {
            return Err(HealingError::RateLimited { retry_after_seconds: rate.retry_after_seconds });
        }

        if self.safety.approval_policy.requires_approval(action, false) {
            self.safety.approval_manager.create_request(action.to_string(), site.to_string(), host.to_string(), action_params.clone());
            return Err(HealingError::ApprovalRequired(action.to_string()));
        }

        let Some(def) = self.catalog.get(action) else {
            return Err(HealingError::Runbook(compliance_runbooks::RunbookError::NotFound(action.to_string())));
        };

        let result = match platform {
            TargetOs::Linux => {
                let target = self
                    .target_resolver
                    .resolve_linux(site, host)
                    .ok_or_else(|| HealingError::Runbook(compliance_runbooks::RunbookError::NotFound(format!("no linux target for {host}"))))?;
                self.ssh.run_runbook(&target, def).await
            }
            TargetOs::Windows => {
                let target = self
                    .target_resolver
                    .resolve_windows(site, host)
                    .ok_or_else(|| HealingError::Runbook(compliance_runbooks::RunbookError::NotFound(format!("no windows target for {host}"))))?;
                self.winrm.run_runbook(&target, def).await
            }
        };

        match &result {
            Ok(r) if r.resolution_status == compliance_runbooks::ResolutionStatus::Success => {
                self.safety.circuit_for(action).record_success();
            }
            _ => {
                self.safety.circuit_for(action).record_failure();
                self.safety.rate_limiter.record_failure(site, site, host, action).await;
            }
        }

        Ok(result?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_execution(
        &self,
        incident: &Incident,
        pattern_signature: &str,
        level: IncidentLevel,
        action: String,
        action_params: Value,
        run_result: compliance_runbooks::RunResult,
        started_at: DateTime<Utc>,
    ) -> HealingResult<HealOutcome> {
        let incident_id = incident.id;
        let success = run_result.resolution_status == compliance_runbooks::ResolutionStatus::Success;
        let outcome = if success { IncidentOutcome::Success } else { IncidentOutcome::Failure };
        let evidence_json = serde_json::to_value(&run_result).unwrap_or(Value::Null);

        let thresholds = PromotionThresholds::from(&self.config);
        let stats_before = self.store.get_pattern_stats(pattern_signature).ok().flatten();
        let promotion_eligible = stats_before.map(|s| learning::eligible_for_promotion(&s, thresholds)).unwrap_or(false);

        self.store.resolve_incident(incident_id, level, Some(action.clone()), outcome, Some(evidence_json), promotion_eligible)?;

        if let (Some(pipeline), Some(def)) = (&self.evidence, self.catalog.get(&action)) {
            let execution = ExecutionMetadata { operator: "automated".to_string(), started_at, ended_at: Utc::now() };
            if let Err(e) = pipeline.record(incident, def, &run_result, &execution, "compliance-healing", None) {
                tracing::error!(incident_id = %incident_id, error = %e, "failed to record evidence bundle for a completed execution");
            }
        }

        Ok(HealOutcome { incident_id, success, escalated: false, level: Some(level), action: Some(action), action_params: Some(action_params) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTargets;
    impl TargetResolver for NoTargets {
        fn resolve_linux(&self, _site: &str, _host: &str) -> Option<LinuxTarget> {
            None
        }
        fn resolve_windows(&self, _site: &str, _host: &str) -> Option<WindowsTarget> {
            None
        }
    }

    fn make_engine() -> HealingEngine {
        let store = Store::open_temporary().unwrap();
        let catalog = RunbookCatalog::default();
        let rule_engine = L1RuleEngine::load(std::path::Path::new("/nonexistent")).unwrap();
        let safety = SafetyEnvelope::new(Box::new(safety::LocalRateLimiter::new(300, 100, 1000)), 5, 60);
        HealingEngine::new(
            store,
            catalog,
            rule_engine,
            None,
            safety,
            Box::new(NoTargets),
            HealingConfig::default(),
            1800,
            1800,
            None,
        )
    }

    #[tokio::test]
    async fn unmatched_incident_escalates_to_l3() {
        let engine = make_engine();
        let outcome = engine.heal("clinic-east", "host-01", "unknown_incident", Severity::Medium, serde_json::json!({})).await.unwrap();
        assert!(outcome.escalated);
        assert_eq!(outcome.level, Some(IncidentLevel::L3));
    }

    #[tokio::test]
    async fn raw_incident_arrivals_never_advance_the_flap_counter() {
        // An incident type with no matching L1 rule and no target to
        // execute against never records a success, so it should never
        // flap no matter how many raw incidents arrive.
        let engine = make_engine();
        for _ in 0..10 {
            let outcome = engine.heal("clinic-east", "host-01", "unmatched_flappy", Severity::Medium, serde_json::json!({})).await.unwrap();
            assert_ne!(outcome.action.as_deref(), Some("flap_suppressed_awaiting_human"));
        }
        assert_eq!(engine.flap_count("clinic-east", "host-01", "unmatched_flappy"), 0);
    }

    #[tokio::test]
    async fn repeated_successful_executions_trip_the_flap_suppression() {
        // Simulates S4: 3 prior successful L1/L2 executions for this
        // incident type, then a 4th raw arrival should escalate via
        // flap suppression rather than attempting another L1 match.
        let engine = make_engine();
        for _ in 0..3 {
            engine.record_flap_success("clinic-east", "host-01", "flappy_incident");
        }
        let outcome = engine.heal("clinic-east", "host-01", "flappy_incident", Severity::Medium, serde_json::json!({})).await.unwrap();
        assert_eq!(outcome.action.as_deref(), Some("flap_suppressed_awaiting_human"));
    }

    #[tokio::test]
    async fn below_threshold_successes_do_not_yet_suppress() {
        // S3: only 2 prior successes recorded, below the default
        // threshold of 3, so the next arrival still proceeds normally
        // rather than escalating via flap suppression.
        let engine = make_engine();
        for _ in 0..2 {
            engine.record_flap_success("clinic-east", "host-01", "flappy_incident");
        }
        let outcome = engine.heal("clinic-east", "host-01", "flappy_incident", Severity::Medium, serde_json::json!({})).await.unwrap();
        assert_ne!(outcome.action.as_deref(), Some("flap_suppressed_awaiting_human"));
    }

    #[tokio::test]
    async fn invalid_site_is_rejected_before_an_incident_is_created() {
        let engine = make_engine();
        let result = engine.heal("bad site!", "host-01", "x", Severity::Low, serde_json::json!({})).await;
        assert!(result.is_err());
    }
}
