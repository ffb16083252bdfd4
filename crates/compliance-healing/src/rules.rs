//! L1 rule catalog: deterministic condition-matched remediation rules
//! with per-target cooldowns, loaded from YAML and reloadable when the
//! learning loop promotes a new pattern.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::condition::{matches_all, Condition};
use crate::error::{HealingError, HealingResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub priority: i32,
    pub conditions: Vec<Condition>,
    pub cooldown_seconds: i64,
    pub action: String,
    #[serde(default)]
    pub action_params: Value,
}

fn cooldown_key(rule_id: &str, site: &str, host: &str) -> String {
    format!("{rule_id}\u{1}{site}\u{1}{host}")
}

/// Holds the ordered rule set plus per-(rule, site, host) cooldown
/// timestamps. Rules are re-sorted on load so matching always walks
/// priority order, ties broken by rule id for determinism.
pub struct L1RuleEngine {
    rules: Vec<Rule>,
    last_fired: DashMap<String, DateTime<Utc>>,
    rules_dir: PathBuf,
}

impl L1RuleEngine {
    pub fn load(rules_dir: &Path) -> HealingResult<Self> {
        let mut rules = load_rules_from(rules_dir)?;
        let promoted_dir = rules_dir.join("promoted");
        if promoted_dir.is_dir() {
            rules.extend(load_rules_from(&promoted_dir)?);
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(Self { rules, last_fired: DashMap::new(), rules_dir: rules_dir.to_path_buf() })
    }

    pub fn reload(&mut self) -> HealingResult<()> {
        let reloaded = Self::load(&self.rules_dir)?;
        self.rules = reloaded.rules;
        Ok(())
    }

    /// First rule, in priority order, whose conditions all match and
    /// whose cooldown for this (site, host) has elapsed.
    pub fn try_match(&self, site: &str, host: &str, raw_data: &Value) -> Option<&Rule> {
        self.rules.iter().find(|rule| {
            if !matches_all(&rule.conditions, raw_data) {
                return false;
            }
            let key = cooldown_key(&rule.id, site, host);
            match self.last_fired.get(&key) {
                Some(fired_at) => (Utc::now() - *fired_at).num_seconds() >= rule.cooldown_seconds,
                None => true,
            }
        })
    }

    pub fn record_fired(&self, rule_id: &str, site: &str, host: &str) {
        self.last_fired.insert(cooldown_key(rule_id, site, host), Utc::now());
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn load_rules_from(dir: &Path) -> HealingResult<Vec<Rule>> {
    let mut rules = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(rules),
        Err(e) => return Err(HealingError::RuleLoad { path: dir.display().to_string(), source_msg: e.to_string() }),
    };
    for entry in entries {
        let entry = entry.map_err(|e| HealingError::RuleLoad { path: dir.display().to_string(), source_msg: e.to_string() })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| HealingError::RuleLoad { path: path.display().to_string(), source_msg: e.to_string() })?;
        let rule: Rule = serde_yaml::from_str(&raw)
            .map_err(|e| HealingError::RuleLoad { path: path.display().to_string(), source_msg: e.to_string() })?;
        rules.push(rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Operator;
    use serde_json::json;

    fn sample_rule(id: &str, priority: i32) -> Rule {
        Rule {
            id: id.to_string(),
            priority,
            conditions: vec![Condition { field_path: "incident_type".into(), operator: Operator::Eq, value: json!("service_down") }],
            cooldown_seconds: 60,
            action: "restart_service".into(),
            action_params: json!({"service_name": "nginx"}),
        }
    }

    #[test]
    fn higher_priority_rule_matches_first() {
        let engine = L1RuleEngine {
            rules: {
                let mut r = vec![sample_rule("low", 1), sample_rule("high", 10)];
                r.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
                r
            },
            last_fired: DashMap::new(),
            rules_dir: PathBuf::new(),
        };
        let data = json!({"incident_type": "service_down"});
        assert_eq!(engine.try_match("site", "host", &data).unwrap().id, "high");
    }

    #[test]
    fn cooldown_suppresses_repeat_match() {
        let engine = L1RuleEngine { rules: vec![sample_rule("r1", 5)], last_fired: DashMap::new(), rules_dir: PathBuf::new() };
        let data = json!({"incident_type": "service_down"});
        assert!(engine.try_match("site", "host", &data).is_some());
        engine.record_fired("r1", "site", "host");
        assert!(engine.try_match("site", "host", &data).is_none());
        assert!(engine.try_match("site", "other-host", &data).is_some());
    }
}
