//! Incident lifecycle, pattern statistics, and flap suppression.

use chrono::{DateTime, Utc};
use compliance_common::domain::{FlapSuppression, Incident, IncidentLevel, IncidentOutcome, PatternStats, Severity};
use uuid::Uuid;

use crate::codec::{decode_ivec, encode, require};
use crate::error::StoreResult;
use crate::Store;

fn flap_key(site: &str, host: &str, incident_type: &str) -> Vec<u8> {
    format!("{site}\u{1}{host}\u{1}{incident_type}").into_bytes()
}

impl Store {
    /// Record a new incident and bump the occurrence counter on its
    /// pattern's rolling statistics, creating the pattern row on
    /// first sight.
    pub fn create_incident(
        &self,
        site: String,
        host: String,
        incident_type: String,
        severity: Severity,
        raw_data: serde_json::Value,
        pattern_signature: String,
    ) -> StoreResult<Incident> {
        let _guard = self.write_lock.lock();

        let incident = Incident {
            id: Uuid::new_v4(),
            site,
            host,
            incident_type,
            severity,
            raw_data,
            pattern_signature: pattern_signature.clone(),
            created_at: Utc::now(),
            level: None,
            action: None,
            outcome: None,
            resolved_at: None,
            human_feedback: None,
        };
        self.incidents.insert(incident.id.as_bytes(), encode(&incident)?)?;

        let mut stats = match self.pattern_stats.get(pattern_signature.as_bytes())? {
            Some(bytes) => decode_ivec(&bytes)?,
            None => PatternStats::new(pattern_signature.clone()),
        };
        stats.occurrences += 1;
        self.pattern_stats.insert(pattern_signature.as_bytes(), encode(&stats)?)?;

        Ok(incident)
    }

    pub fn get_incident(&self, id: Uuid) -> StoreResult<Option<Incident>> {
        match self.incidents.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_ivec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Close out an incident with its healing level/action/outcome and
    /// roll the result into the pattern's rolling statistics. Promotion
    /// eligibility is computed by the caller against its configured
    /// thresholds and passed in as `promotion_eligible`, so the store
    /// carries no healing-policy knowledge.
    pub fn resolve_incident(
        &self,
        id: Uuid,
        level: IncidentLevel,
        action: Option<String>,
        outcome: IncidentOutcome,
        human_feedback: Option<serde_json::Value>,
        promotion_eligible: bool,
    ) -> StoreResult<Incident> {
        let _guard = self.write_lock.lock();

        let bytes = require(self.incidents.get(id.as_bytes())?, "incident")?;
        let mut incident: Incident = decode_ivec(&bytes)?;
        let resolved_at = Utc::now();

        incident.level = Some(level);
        incident.action = action.clone();
        incident.outcome = Some(outcome);
        incident.resolved_at = Some(resolved_at);
        incident.human_feedback = human_feedback;
        self.incidents.insert(id.as_bytes(), encode(&incident)?)?;

        let mut stats: PatternStats = match self.pattern_stats.get(incident.pattern_signature.as_bytes())? {
            Some(bytes) => decode_ivec(&bytes)?,
            None => PatternStats::new(incident.pattern_signature.clone()),
        };
        match level {
            IncidentLevel::L1 => stats.l1_resolutions += 1,
            IncidentLevel::L2 => stats.l2_resolutions += 1,
            IncidentLevel::L3 => stats.l3_escalations += 1,
        }
        let resolution_seconds = (resolved_at - incident.created_at).num_seconds().max(0) as f64;
        let prior_resolved = stats.l1_resolutions + stats.l2_resolutions + stats.l3_escalations - 1;
        stats.avg_resolution_seconds =
            (stats.avg_resolution_seconds * prior_resolved as f64 + resolution_seconds) / (prior_resolved + 1) as f64;

        if matches!(outcome, IncidentOutcome::Success) {
            stats.success_count += 1;
        }
        let attempts = stats.l1_resolutions + stats.l2_resolutions;
        if attempts > 0 {
            stats.success_rate = stats.success_count as f64 / attempts as f64;
        }
        if matches!(outcome, IncidentOutcome::Success) && action.is_some() {
            stats.recommended_action = action;
        }
        stats.promotion_eligible = promotion_eligible;
        self.pattern_stats.insert(incident.pattern_signature.as_bytes(), encode(&stats)?)?;

        Ok(incident)
    }

    pub fn get_pattern_stats(&self, pattern_signature: &str) -> StoreResult<Option<PatternStats>> {
        match self.pattern_stats.get(pattern_signature.as_bytes())? {
            Some(bytes) => Ok(Some(decode_ivec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All pattern-statistics rows, for the learning loop's promotion
    /// sweep (`PatternStats` rows are few enough to scan in full).
    pub fn all_pattern_stats(&self) -> StoreResult<Vec<PatternStats>> {
        let mut all = Vec::new();
        for item in self.pattern_stats.iter() {
            let (_, bytes) = item?;
            all.push(decode_ivec(&bytes)?);
        }
        Ok(all)
    }

    pub fn mark_pattern_promoted(&self, pattern_signature: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let bytes = require(self.pattern_stats.get(pattern_signature.as_bytes())?, "pattern_stats")?;
        let mut stats: PatternStats = decode_ivec(&bytes)?;
        stats.promoted = true;
        self.pattern_stats.insert(pattern_signature.as_bytes(), encode(&stats)?)?;
        Ok(())
    }

    /// Recent incidents for a (site, host, incident_type) triple,
    /// newest first, used by the in-memory flap-window check.
    pub fn recent_incidents(
        &self,
        site: &str,
        host: &str,
        incident_type: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Incident>> {
        let mut matched = Vec::new();
        for item in self.incidents.iter() {
            let (_, bytes) = item?;
            let incident: Incident = decode_ivec(&bytes)?;
            if incident.site == site
                && incident.host == host
                && incident.incident_type == incident_type
                && incident.created_at >= since
            {
                matched.push(incident);
            }
        }
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    /// All incidents sharing a pattern signature, for the learning
    /// loop to infer common condition fields from.
    pub fn incidents_for_pattern(&self, pattern_signature: &str) -> StoreResult<Vec<Incident>> {
        let mut matched = Vec::new();
        for item in self.incidents.iter() {
            let (_, bytes) = item?;
            let incident: Incident = decode_ivec(&bytes)?;
            if incident.pattern_signature == pattern_signature {
                matched.push(incident);
            }
        }
        Ok(matched)
    }

    pub fn record_flap_suppression(&self, site: String, host: String, incident_type: String, reason: String) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let key = flap_key(&site, &host, &incident_type);
        let suppression = FlapSuppression {
            site,
            host,
            incident_type,
            reason,
            created_at: Utc::now(),
            cleared_at: None,
            cleared_by: None,
        };
        self.flap_suppressions.insert(key, encode(&suppression)?)?;
        Ok(())
    }

    pub fn clear_flap_suppression(&self, site: &str, host: &str, incident_type: &str, cleared_by: String) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let key = flap_key(site, host, incident_type);
        if let Some(bytes) = self.flap_suppressions.get(&key)? {
            let mut suppression: FlapSuppression = decode_ivec(&bytes)?;
            suppression.cleared_at = Some(Utc::now());
            suppression.cleared_by = Some(cleared_by);
            self.flap_suppressions.insert(key, encode(&suppression)?)?;
        }
        Ok(())
    }

    pub fn is_flap_suppressed(&self, site: &str, host: &str, incident_type: &str) -> StoreResult<bool> {
        let key = flap_key(site, host, incident_type);
        match self.flap_suppressions.get(key)? {
            Some(bytes) => {
                let suppression: FlapSuppression = decode_ivec(&bytes)?;
                Ok(suppression.cleared_at.is_none())
            }
            None => Ok(false),
        }
    }

    /// Monthly sweep: deletes resolved incidents whose `resolved_at`
    /// is older than `cutoff`. Per the retention decision, unresolved
    /// incidents are never pruned regardless of age.
    pub fn prune_resolved_incidents(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let _guard = self.write_lock.lock();
        let mut pruned = 0u64;
        let mut to_remove = Vec::new();
        for item in self.incidents.iter() {
            let (key, bytes) = item?;
            let incident: Incident = decode_ivec(&bytes)?;
            if let Some(resolved_at) = incident.resolved_at {
                if resolved_at < cutoff {
                    to_remove.push(key);
                }
            }
        }
        for key in to_remove {
            self.incidents.remove(key)?;
            pruned += 1;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(store: &Store) -> Incident {
        store
            .create_incident(
                "clinic-east".into(),
                "host-01".into(),
                "service_down".into(),
                Severity::High,
                serde_json::json!({"service": "nginx"}),
                "abc123".into(),
            )
            .unwrap()
    }

    #[test]
    fn create_incident_bumps_occurrence_count() {
        let store = Store::open_temporary().unwrap();
        sample(&store);
        sample(&store);
        let stats = store.get_pattern_stats("abc123").unwrap().unwrap();
        assert_eq!(stats.occurrences, 2);
    }

    #[test]
    fn resolve_incident_updates_success_rate() {
        let store = Store::open_temporary().unwrap();
        let incident = sample(&store);
        store
            .resolve_incident(
                incident.id,
                IncidentLevel::L1,
                Some("restart_service".into()),
                IncidentOutcome::Success,
                None,
                false,
            )
            .unwrap();
        let stats = store.get_pattern_stats("abc123").unwrap().unwrap();
        assert_eq!(stats.l1_resolutions, 1);
        assert_eq!(stats.success_count, 1);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn flap_suppression_round_trips() {
        let store = Store::open_temporary().unwrap();
        assert!(!store.is_flap_suppressed("site", "host", "service_down").unwrap());
        store
            .record_flap_suppression("site".into(), "host".into(), "service_down".into(), "3 in 2h".into())
            .unwrap();
        assert!(store.is_flap_suppressed("site", "host", "service_down").unwrap());
        store.clear_flap_suppression("site", "host", "service_down", "operator".into()).unwrap();
        assert!(!store.is_flap_suppressed("site", "host", "service_down").unwrap());
    }

    #[test]
    fn incidents_for_pattern_filters_by_signature() {
        let store = Store::open_temporary().unwrap();
        sample(&store);
        store
            .create_incident("clinic-east".into(), "host-02".into(), "disk_full".into(), Severity::Medium, serde_json::json!({}), "def456".into())
            .unwrap();
        assert_eq!(store.incidents_for_pattern("abc123").unwrap().len(), 1);
        assert_eq!(store.incidents_for_pattern("def456").unwrap().len(), 1);
    }

    #[test]
    fn prune_never_removes_unresolved_incidents() {
        let store = Store::open_temporary().unwrap();
        let incident = sample(&store);
        let far_future = Utc::now() + chrono::Duration::days(3650);
        let pruned = store.prune_resolved_incidents(far_future).unwrap();
        assert_eq!(pruned, 0);
        assert!(store.get_incident(incident.id).unwrap().is_some());
    }

    #[test]
    fn all_pattern_stats_returns_every_row() {
        let store = Store::open_temporary().unwrap();
        sample(&store);
        store
            .create_incident("clinic-east".into(), "host-02".into(), "disk_full".into(), Severity::Medium, serde_json::json!({}), "def456".into())
            .unwrap();
        let all = store.all_pattern_stats().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn prune_removes_old_resolved_incidents_only() {
        let store = Store::open_temporary().unwrap();
        let incident = sample(&store);
        store
            .resolve_incident(incident.id, IncidentLevel::L1, None, IncidentOutcome::Success, None, false)
            .unwrap();
        let far_future = Utc::now() + chrono::Duration::days(3650);
        let pruned = store.prune_resolved_incidents(far_future).unwrap();
        assert_eq!(pruned, 1);
        assert!(store.get_incident(incident.id).unwrap().is_none());
    }
}
