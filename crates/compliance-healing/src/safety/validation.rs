//! Input validation and path/service whitelisting: rejects anything
//! that looks like a shell-injection or traversal attempt before it
//! reaches a transport.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self { is_valid: true, errors: vec![] }
    }
    fn err(errors: Vec<String>) -> Self {
        Self { is_valid: false, errors }
    }
}

fn dangerous_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"[;&|`$(){}]", r"\.\.", r"/etc/passwd", r"/etc/shadow", r"rm\s+-rf", r">/dev/"]
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect()
    })
}

fn find_dangerous_pattern(value: &str) -> Option<&'static str> {
    let names = [r"[;&|`$(){}]", r"\.\.", r"/etc/passwd", r"/etc/shadow", r"rm\s+-rf", r">/dev/"];
    for (regex, name) in dangerous_patterns().iter().zip(names.iter()) {
        if regex.is_match(value) {
            return Some(name);
        }
    }
    None
}

pub const ALLOWED_PATH_PREFIXES: &[&str] = &["/var/log", "/var/cache", "/var/lib/compliance-appliance", "/tmp/compliance-appliance"];

#[derive(Default)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_incident(&self, site: &str, host: &str, incident_type: &str, severity: &str, raw_data: &Value) -> ValidationResult {
        let mut errors = Vec::new();

        if site.is_empty() {
            errors.push("missing required field: site".into());
        }
        if host.is_empty() {
            errors.push("missing required field: host".into());
        }
        if incident_type.is_empty() {
            errors.push("missing required field: incident_type".into());
        }
        if !errors.is_empty() {
            return ValidationResult::err(errors);
        }

        let client_id_re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
        if !client_id_re.is_match(site) {
            errors.push("invalid site format (alphanumeric, dash, underscore only)".into());
        }

        let hostname_re = Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap();
        if !hostname_re.is_match(host) {
            errors.push("invalid hostname format".into());
        }

        let valid_severities = ["critical", "high", "medium", "low"];
        if !valid_severities.contains(&severity) {
            errors.push(format!("invalid severity, must be one of: {valid_severities:?}"));
        }

        for (key, value) in [("site", site), ("host", host), ("incident_type", incident_type)] {
            if let Some(pattern) = find_dangerous_pattern(value) {
                errors.push(format!("dangerous pattern detected in {key}: {pattern}"));
            }
        }
        scan_json_strings(raw_data, &mut errors);

        if errors.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult::err(errors)
        }
    }

    pub fn validate_path(&self, path: &str) -> ValidationResult {
        let mut errors = Vec::new();
        if let Some(pattern) = find_dangerous_pattern(path) {
            errors.push(format!("dangerous pattern in path: {pattern}"));
        }
        if !ALLOWED_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
            errors.push(format!("path '{path}' not under an allowed prefix: {ALLOWED_PATH_PREFIXES:?}"));
        }
        if errors.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult::err(errors)
        }
    }
}

fn scan_json_strings(value: &Value, errors: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(pattern) = find_dangerous_pattern(s) {
                errors.push(format!("dangerous pattern detected in raw_data: {pattern}"));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| scan_json_strings(v, errors)),
        Value::Object(map) => map.values().for_each(|v| scan_json_strings(v, errors)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_incident() {
        let validator = InputValidator::new();
        let result = validator.validate_incident("clinic-001", "srv-primary", "backup_failure", "high", &json!({}));
        assert!(result.is_valid);
    }

    #[test]
    fn rejects_command_injection_in_site() {
        let validator = InputValidator::new();
        let result = validator.validate_incident("clinic-001; rm -rf /", "srv-primary", "backup_failure", "high", &json!({}));
        assert!(!result.is_valid);
    }

    #[test]
    fn rejects_unknown_severity() {
        let validator = InputValidator::new();
        let result = validator.validate_incident("clinic-001", "srv", "backup_failure", "urgent", &json!({}));
        assert!(!result.is_valid);
    }

    #[test]
    fn rejects_traversal_in_nested_raw_data() {
        let validator = InputValidator::new();
        let result = validator.validate_incident("clinic-001", "srv", "x", "high", &json!({"path": "/var/log/../../etc/shadow"}));
        assert!(!result.is_valid);
    }

    #[test]
    fn path_validation_enforces_allowed_prefix() {
        let validator = InputValidator::new();
        assert!(validator.validate_path("/var/log/nginx/access.log").is_valid);
        assert!(!validator.validate_path("/home/user/.ssh/id_rsa").is_valid);
    }
}
