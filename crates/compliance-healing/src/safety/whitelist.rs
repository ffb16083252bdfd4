//! Per-action parameter whitelisting: every parameter value a
//! remediation action would use must appear in that action's
//! declared allow-list.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterWhitelist {
    whitelists: HashMap<String, HashMap<String, Vec<String>>>,
}

impl ParameterWhitelist {
    pub fn new() -> Self {
        Self { whitelists: HashMap::new() }
    }

    pub fn register(&mut self, action: impl Into<String>, param: impl Into<String>, allowed_values: Vec<String>) {
        self.whitelists.entry(action.into()).or_default().insert(param.into(), allowed_values);
    }

    /// `Ok(())` when every parameter present in `action`'s whitelist is
    /// set to an allowed value. An action with no registered whitelist
    /// is allowed through unchanged — callers that need deny-by-default
    /// should register an (empty) whitelist for every action they expose.
    pub fn validate(&self, action: &str, parameters: &serde_json::Value) -> Result<(), Vec<String>> {
        let Some(action_whitelist) = self.whitelists.get(action) else {
            return Ok(());
        };

        let mut errors = Vec::new();
        if let Some(map) = parameters.as_object() {
            for (param_name, param_value) in map {
                if let Some(allowed) = action_whitelist.get(param_name) {
                    let value_str = param_value.as_str().map(str::to_string).unwrap_or_else(|| param_value.to_string());
                    if !allowed.contains(&value_str) {
                        errors.push(format!("parameter '{param_name}' value '{value_str}' not in whitelist for action '{action}'"));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ParameterWhitelist {
        let mut wl = ParameterWhitelist::new();
        wl.register("restart_service", "service_name", vec!["nginx".into(), "postgresql".into()]);
        wl
    }

    #[test]
    fn accepts_whitelisted_value() {
        let wl = sample();
        assert!(wl.validate("restart_service", &json!({"service_name": "nginx"})).is_ok());
    }

    #[test]
    fn rejects_non_whitelisted_value() {
        let wl = sample();
        assert!(wl.validate("restart_service", &json!({"service_name": "malicious-service"})).is_err());
    }

    #[test]
    fn action_without_whitelist_passes_through() {
        let wl = sample();
        assert!(wl.validate("unregistered_action", &json!({"anything": "goes"})).is_ok());
    }
}
