//! Site-scoped documented exemptions: a runbook, check, or control can
//! be exempted from alerting and/or remediation for a bounded period,
//! with the maximum duration capped by the approving tier.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionScope {
    Runbook,
    Check,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionAction {
    SuppressAlert,
    SkipRemediation,
    Both,
}

impl ExceptionAction {
    fn suppresses_alert(&self) -> bool {
        matches!(self, ExceptionAction::SuppressAlert | ExceptionAction::Both)
    }
    fn skips_remediation(&self) -> bool {
        matches!(self, ExceptionAction::SkipRemediation | ExceptionAction::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalTier {
    ClientAdmin,
    Partner,
    L3Escalation,
    CentralCommand,
}

impl ApprovalTier {
    pub fn max_duration_days(&self) -> i64 {
        match self {
            ApprovalTier::ClientAdmin => 30,
            ApprovalTier::Partner => 90,
            ApprovalTier::L3Escalation => 365,
            ApprovalTier::CentralCommand => 3650,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComplianceException {
    pub id: Uuid,
    pub site: String,
    pub scope: ExceptionScope,
    pub item_id: String,
    pub action: ExceptionAction,
    pub device_filter: Option<String>,
    pub tier: ApprovalTier,
    pub reason: String,
    pub approved_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ComplianceException {
    pub fn is_valid(&self) -> bool {
        self.revoked_at.is_none() && self.expires_at > Utc::now()
    }

    pub fn days_until_expiration(&self) -> i64 {
        (self.expires_at - Utc::now()).num_days()
    }

    pub fn needs_renewal_reminder(&self) -> bool {
        self.is_valid() && self.days_until_expiration() <= 7
    }

    /// Stable hash of the exception's decision-relevant fields, for
    /// tamper-evident audit logging.
    pub fn compute_audit_hash(&self) -> String {
        let mut fields = vec![
            format!("site={}", self.site),
            format!("item_id={}", self.item_id),
            format!("approved_by={}", self.approved_by),
            format!("created_at={}", self.created_at.to_rfc3339()),
            format!("expires_at={}", self.expires_at.to_rfc3339()),
        ];
        fields.sort();
        let joined = fields.join("\u{1}");
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn matches_device(&self, host: &str, ip: Option<&str>) -> bool {
        let Some(pattern) = &self.device_filter else {
            return true;
        };
        let Ok(re) = Regex::new(pattern) else { return false };
        re.is_match(host) || ip.is_some_and(|ip| re.is_match(ip))
    }
}

pub struct ExceptionManager {
    exceptions: DashMap<Uuid, ComplianceException>,
}

impl ExceptionManager {
    pub fn new() -> Self {
        Self { exceptions: DashMap::new() }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_exception(
        &self,
        site: String,
        scope: ExceptionScope,
        item_id: String,
        action: ExceptionAction,
        device_filter: Option<String>,
        tier: ApprovalTier,
        duration_days: i64,
        reason: String,
        approved_by: String,
    ) -> Result<ComplianceException, String> {
        let max_days = tier.max_duration_days();
        if duration_days > max_days {
            return Err(format!("duration {duration_days}d exceeds max {max_days}d for this approval tier"));
        }
        let now = Utc::now();
        let exception = ComplianceException {
            id: Uuid::new_v4(),
            site,
            scope,
            item_id,
            action,
            device_filter,
            tier,
            reason,
            approved_by,
            created_at: now,
            expires_at: now + Duration::days(duration_days),
            revoked_at: None,
        };
        self.exceptions.insert(exception.id, exception.clone());
        Ok(exception)
    }

    /// First valid exception matching (site, scope, item_id) whose
    /// device filter, if any, matches this host/ip.
    pub fn check_exception(&self, site: &str, scope: ExceptionScope, item_id: &str, host: &str, ip: Option<&str>) -> Option<ComplianceException> {
        self.exceptions
            .iter()
            .find(|e| e.site == site && e.scope == scope && e.item_id == item_id && e.is_valid() && e.matches_device(host, ip))
            .map(|e| e.clone())
    }

    pub fn should_suppress_alert(&self, site: &str, scope: ExceptionScope, item_id: &str, host: &str, ip: Option<&str>) -> bool {
        self.check_exception(site, scope, item_id, host, ip).is_some_and(|e| e.action.suppresses_alert())
    }

    pub fn should_skip_remediation(&self, site: &str, scope: ExceptionScope, item_id: &str, host: &str, ip: Option<&str>) -> bool {
        self.check_exception(site, scope, item_id, host, ip).is_some_and(|e| e.action.skips_remediation())
    }

    pub fn revoke_exception(&self, id: Uuid) -> Option<ComplianceException> {
        self.exceptions.get_mut(&id).map(|mut e| {
            e.revoked_at = Some(Utc::now());
            e.clone()
        })
    }

    pub fn renew_exception(&self, id: Uuid, additional_days: i64) -> Result<ComplianceException, String> {
        let mut entry = self.exceptions.get_mut(&id).ok_or_else(|| "exception not found".to_string())?;
        let max_days = entry.tier.max_duration_days();
        let new_expiry = entry.expires_at + Duration::days(additional_days);
        if (new_expiry - entry.created_at).num_days() > max_days {
            return Err(format!("renewal would exceed max duration {max_days}d for this approval tier"));
        }
        entry.expires_at = new_expiry;
        Ok(entry.clone())
    }

    pub fn get_expiring_soon(&self) -> Vec<ComplianceException> {
        self.exceptions.iter().filter(|e| e.needs_renewal_reminder()).map(|e| e.clone()).collect()
    }
}

impl Default for ExceptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duration_beyond_tier_cap() {
        let manager = ExceptionManager::new();
        let result = manager.create_exception(
            "clinic".into(),
            ExceptionScope::Check,
            "disk_usage".into(),
            ExceptionAction::SuppressAlert,
            None,
            ApprovalTier::ClientAdmin,
            60,
            "pending disk upgrade".into(),
            "admin".into(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn suppresses_alert_when_action_matches() {
        let manager = ExceptionManager::new();
        manager
            .create_exception(
                "clinic".into(),
                ExceptionScope::Check,
                "disk_usage".into(),
                ExceptionAction::SuppressAlert,
                None,
                ApprovalTier::Partner,
                30,
                "known issue".into(),
                "partner-ops".into(),
            )
            .unwrap();
        assert!(manager.should_suppress_alert("clinic", ExceptionScope::Check, "disk_usage", "any-host", None));
        assert!(!manager.should_skip_remediation("clinic", ExceptionScope::Check, "disk_usage", "any-host", None));
    }

    #[test]
    fn device_filter_restricts_matches() {
        let manager = ExceptionManager::new();
        manager
            .create_exception(
                "clinic".into(),
                ExceptionScope::Runbook,
                "LIN-SSH-001".into(),
                ExceptionAction::Both,
                Some(r"^legacy-".to_string()),
                ApprovalTier::L3Escalation,
                90,
                "legacy fleet exempt".into(),
                "l3-oncall".into(),
            )
            .unwrap();
        assert!(manager.check_exception("clinic", ExceptionScope::Runbook, "LIN-SSH-001", "legacy-host-1", None).is_some());
        assert!(manager.check_exception("clinic", ExceptionScope::Runbook, "LIN-SSH-001", "modern-host-1", None).is_none());
    }

    #[test]
    fn revoked_exception_is_no_longer_valid() {
        let manager = ExceptionManager::new();
        let exception = manager
            .create_exception(
                "clinic".into(),
                ExceptionScope::Control,
                "164.312(a)(1)".into(),
                ExceptionAction::SuppressAlert,
                None,
                ApprovalTier::CentralCommand,
                365,
                "org-wide waiver".into(),
                "central-command".into(),
            )
            .unwrap();
        manager.revoke_exception(exception.id);
        assert!(manager.check_exception("clinic", ExceptionScope::Control, "164.312(a)(1)", "host", None).is_none());
    }

    #[test]
    fn audit_hash_is_deterministic() {
        let manager = ExceptionManager::new();
        let exception = manager
            .create_exception(
                "clinic".into(),
                ExceptionScope::Check,
                "backup".into(),
                ExceptionAction::SkipRemediation,
                None,
                ApprovalTier::ClientAdmin,
                10,
                "reason".into(),
                "admin".into(),
            )
            .unwrap();
        assert_eq!(exception.compute_audit_hash(), exception.compute_audit_hash());
    }
}
