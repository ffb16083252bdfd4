//! Promotion loop: scans pattern statistics for signatures proven out
//! at L2 and materializes them as new L1 rules, so the next matching
//! incident resolves deterministically instead of going back through
//! the planner.

use chrono::Utc;
use compliance_common::domain::PatternStats;
use compliance_store::Store;
use serde_json::Value;
use std::path::Path;

use crate::condition::{Condition, Operator};
use crate::error::HealingResult;
use crate::rules::Rule;

#[derive(Debug, Clone, Copy)]
pub struct PromotionThresholds {
    pub min_occurrences: u64,
    pub min_l2_resolutions: u64,
    pub min_success_rate: f64,
}

/// Whether a pattern has proven out enough at L2 to promote to an L1
/// rule, or (called from the healing engine) to mark a just-resolved
/// incident's evidence as promotion-eligible.
pub fn eligible_for_promotion(stats: &PatternStats, thresholds: PromotionThresholds) -> bool {
    !stats.promoted
        && stats.occurrences >= thresholds.min_occurrences
        && stats.l2_resolutions >= thresholds.min_l2_resolutions
        && stats.success_rate >= thresholds.min_success_rate
        && stats.recommended_action.is_some()
}

/// Fields shared by every sampled incident's raw_data become
/// equality conditions for the promoted rule; fields that vary are
/// dropped since they can't be asserted deterministically.
fn infer_conditions(samples: &[Value]) -> Vec<Condition> {
    let Some(first) = samples.first().and_then(|v| v.as_object()) else {
        return vec![];
    };

    let mut conditions = Vec::new();
    for (key, value) in first {
        if value.is_object() || value.is_array() {
            continue;
        }
        let all_match = samples.iter().all(|sample| sample.get(key) == Some(value));
        if all_match {
            conditions.push(Condition { field_path: key.clone(), operator: Operator::Eq, value: value.clone() });
        }
    }
    conditions.sort_by(|a, b| a.field_path.cmp(&b.field_path));
    conditions
}

/// Runs one promotion sweep, writing a rule file per newly-eligible
/// signature into `<rules_dir>/promoted/` and marking it promoted in
/// the store. Returns the signatures promoted this sweep.
pub fn run_promotion_sweep(store: &Store, rules_dir: &Path, thresholds: PromotionThresholds) -> HealingResult<Vec<String>> {
    let promoted_dir = rules_dir.join("promoted");
    std::fs::create_dir_all(&promoted_dir).map_err(|e| crate::error::HealingError::RuleLoad {
        path: promoted_dir.display().to_string(),
        source_msg: e.to_string(),
    })?;

    let mut promoted = Vec::new();
    for stats in store.all_pattern_stats()? {
        if !eligible_for_promotion(&stats, thresholds) {
            continue;
        }
        let Some(action) = stats.recommended_action.clone() else { continue };

        let samples: Vec<Value> = store.incidents_for_pattern(&stats.pattern_signature)?.into_iter().map(|i| i.raw_data).collect();
        let conditions = infer_conditions(&samples);
        if conditions.is_empty() {
            // Nothing distinguishing enough to promote safely; leave
            // the pattern at L2 until its samples converge.
            continue;
        }

        let rule = Rule {
            id: format!("promoted-{}", stats.pattern_signature),
            priority: 0,
            conditions,
            cooldown_seconds: 300,
            action,
            action_params: Value::Null,
        };
        let path = promoted_dir.join(format!("{}.yaml", rule.id));
        let yaml = serde_yaml::to_string(&rule).map_err(|e| crate::error::HealingError::RuleLoad { path: path.display().to_string(), source_msg: e.to_string() })?;
        std::fs::write(&path, yaml).map_err(|e| crate::error::HealingError::RuleLoad { path: path.display().to_string(), source_msg: e.to_string() })?;

        store.mark_pattern_promoted(&stats.pattern_signature)?;
        tracing::info!(pattern_signature = %stats.pattern_signature, promoted_at = %Utc::now(), "promoted L2 pattern to L1 rule");
        promoted.push(stats.pattern_signature);
    }

    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_common::domain::{IncidentLevel, IncidentOutcome, Severity};
    use serde_json::json;

    fn seed_pattern(store: &Store, signature: &str, occurrences: u32) -> String {
        let mut incident_id = None;
        for i in 0..occurrences {
            let incident = store
                .create_incident(
                    "clinic-east".into(),
                    format!("host-{i}"),
                    "service_down".into(),
                    Severity::High,
                    json!({"service_name": "nginx", "host_index": i}),
                    signature.into(),
                )
                .unwrap();
            incident_id = Some(incident.id);
            store
                .resolve_incident(incident.id, IncidentLevel::L2, Some("restart_service".into()), IncidentOutcome::Success, None, false)
                .unwrap();
        }
        let _ = incident_id;
        signature.to_string()
    }

    #[test]
    fn promotes_signature_meeting_all_thresholds() {
        let store = Store::open_temporary().unwrap();
        let signature = seed_pattern(&store, "sig1", 5);
        let dir = tempdir();
        let promoted = run_promotion_sweep(
            &store,
            &dir,
            PromotionThresholds { min_occurrences: 5, min_l2_resolutions: 3, min_success_rate: 0.9 },
        )
        .unwrap();
        assert_eq!(promoted, vec![signature]);
        assert!(store.get_pattern_stats("sig1").unwrap().unwrap().promoted);
    }

    #[test]
    fn leaves_under_threshold_signature_unpromoted() {
        let store = Store::open_temporary().unwrap();
        seed_pattern(&store, "sig2", 2);
        let dir = tempdir();
        let promoted = run_promotion_sweep(
            &store,
            &dir,
            PromotionThresholds { min_occurrences: 5, min_l2_resolutions: 3, min_success_rate: 0.9 },
        )
        .unwrap();
        assert!(promoted.is_empty());
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("compliance-healing-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
