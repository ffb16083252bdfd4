//! Approval policy: every action carries a category and a
//! requires-approval flag; disruptive actions outside a maintenance
//! window must clear a time-bounded approval request before they run.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    Disruptive,
    ServiceRestart,
    ConfigChange,
    AlertOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    AutoApproved,
}

#[derive(Debug, Clone)]
pub struct ActionPolicy {
    pub category: ActionCategory,
    pub requires_approval: bool,
    pub auto_approve_in_maintenance: bool,
    pub description: String,
    pub risk_level: String,
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub action: String,
    pub site: String,
    pub host: String,
    pub parameters: serde_json::Value,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

const DEFAULT_EXPIRATION_HOURS: i64 = 4;

pub struct ApprovalPolicy {
    policies: HashMap<String, ActionPolicy>,
}

impl ApprovalPolicy {
    pub fn new() -> Self {
        Self { policies: HashMap::new() }
    }

    pub fn register(&mut self, action: impl Into<String>, policy: ActionPolicy) {
        self.policies.insert(action.into(), policy);
    }

    pub fn policy_for(&self, action: &str) -> Option<&ActionPolicy> {
        self.policies.get(action)
    }

    /// Whether `action` needs an approval request before it can run,
    /// given whether the target is currently inside a maintenance
    /// window. Actions with no registered policy default to requiring
    /// approval (deny by default for unrecognized actions).
    pub fn requires_approval(&self, action: &str, in_maintenance_window: bool) -> bool {
        match self.policies.get(action) {
            Some(policy) => policy.requires_approval && !(in_maintenance_window && policy.auto_approve_in_maintenance),
            None => true,
        }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        let mut policy = Self::new();
        policy.register(
            "restart_service",
            ActionPolicy {
                category: ActionCategory::ServiceRestart,
                requires_approval: false,
                auto_approve_in_maintenance: true,
                description: "Restart a whitelisted service".into(),
                risk_level: "low".into(),
            },
        );
        policy.register(
            "reboot_host",
            ActionPolicy {
                category: ActionCategory::Disruptive,
                requires_approval: true,
                auto_approve_in_maintenance: true,
                description: "Reboot the target host".into(),
                risk_level: "high".into(),
            },
        );
        policy.register(
            "update_config",
            ActionPolicy {
                category: ActionCategory::ConfigChange,
                requires_approval: true,
                auto_approve_in_maintenance: false,
                description: "Modify a configuration file".into(),
                risk_level: "medium".into(),
            },
        );
        policy.register(
            "notify_only",
            ActionPolicy {
                category: ActionCategory::AlertOnly,
                requires_approval: false,
                auto_approve_in_maintenance: true,
                description: "Send a notification without remediating".into(),
                risk_level: "low".into(),
            },
        );
        policy
    }
}

/// In-memory approval request ledger. A durable backend (the
/// inventory store, or an external ticketing system) can replace this
/// without changing the policy decisions above.
pub struct ApprovalManager {
    requests: DashMap<Uuid, ApprovalRequest>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self { requests: DashMap::new() }
    }

    pub fn create_request(&self, action: String, site: String, host: String, parameters: serde_json::Value) -> ApprovalRequest {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            action,
            site,
            host,
            parameters,
            status: ApprovalStatus::Pending,
            requested_at: now,
            expires_at: now + Duration::hours(DEFAULT_EXPIRATION_HOURS),
            decided_by: None,
            decided_at: None,
        };
        self.requests.insert(request.id, request.clone());
        request
    }

    pub fn approve(&self, id: Uuid, approved_by: String) -> Option<ApprovalRequest> {
        self.requests.get_mut(&id).map(|mut req| {
            req.status = ApprovalStatus::Approved;
            req.decided_by = Some(approved_by);
            req.decided_at = Some(Utc::now());
            req.clone()
        })
    }

    pub fn reject(&self, id: Uuid, rejected_by: String) -> Option<ApprovalRequest> {
        self.requests.get_mut(&id).map(|mut req| {
            req.status = ApprovalStatus::Rejected;
            req.decided_by = Some(rejected_by);
            req.decided_at = Some(Utc::now());
            req.clone()
        })
    }

    pub fn get(&self, id: Uuid) -> Option<ApprovalRequest> {
        self.requests.get(&id).map(|r| r.clone())
    }

    pub fn get_pending(&self) -> Vec<ApprovalRequest> {
        self.requests.iter().filter(|r| r.status == ApprovalStatus::Pending).map(|r| r.clone()).collect()
    }

    /// Sweeps pending requests whose expiry has passed, marking them
    /// `Expired`. Returns how many were swept.
    pub fn expire_old_requests(&self) -> u32 {
        let now = Utc::now();
        let mut expired = 0;
        for mut entry in self.requests.iter_mut() {
            if entry.status == ApprovalStatus::Pending && entry.expires_at < now {
                entry.status = ApprovalStatus::Expired;
                expired += 1;
            }
        }
        expired
    }
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_restart_is_auto_approved_outside_maintenance() {
        let policy = ApprovalPolicy::default();
        assert!(!policy.requires_approval("restart_service", false));
    }

    #[test]
    fn config_change_requires_approval_even_in_maintenance() {
        let policy = ApprovalPolicy::default();
        assert!(policy.requires_approval("update_config", true));
    }

    #[test]
    fn disruptive_auto_approves_only_in_maintenance() {
        let policy = ApprovalPolicy::default();
        assert!(policy.requires_approval("reboot_host", false));
        assert!(!policy.requires_approval("reboot_host", true));
    }

    #[test]
    fn unregistered_action_defaults_to_requiring_approval() {
        let policy = ApprovalPolicy::default();
        assert!(policy.requires_approval("unknown_action", true));
    }

    #[test]
    fn approval_lifecycle() {
        let manager = ApprovalManager::new();
        let request = manager.create_request("reboot_host".into(), "clinic".into(), "host".into(), json!({}));
        assert_eq!(manager.get_pending().len(), 1);
        manager.approve(request.id, "admin".into());
        assert_eq!(manager.get(request.id).unwrap().status, ApprovalStatus::Approved);
        assert!(manager.get_pending().is_empty());
    }
}
