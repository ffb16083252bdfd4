//! Deterministic pattern-signature generation
//!
//! A pure function `(incident_type, context) -> 16-hex-string`, used
//! identically by the store (on incident creation) and by the L2
//! planner (on incident->runbook decisions) so that every consumer
//! computes the same signature for equivalent inputs. Error strings
//! are normalized before hashing by stripping ISO timestamps, IPv4
//! addresses, and integer runs.

use sha2::{Digest, Sha256};

fn normalize_error_string(input: &str) -> String {
    let iso_ts = regex::Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?").unwrap();
    let ipv4 = regex::Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap();
    let digits = regex::Regex::new(r"\d+").unwrap();

    let s = iso_ts.replace_all(input, "<ts>");
    let s = ipv4.replace_all(&s, "<ip>");
    let s = digits.replace_all(&s, "<n>");
    s.to_string()
}

/// Compute the deterministic 16-hex-char pattern signature for an
/// incident type, a normalized check-context string, and an error
/// string (which is normalized internally).
pub fn pattern_signature(incident_type: &str, check_context: &str, error_text: &str) -> String {
    let normalized_error = normalize_error_string(error_text);
    let joined = format!(
        "{}:{}:{}",
        incident_type.trim().to_lowercase(),
        check_context.trim().to_lowercase(),
        normalized_error.trim().to_lowercase()
    );
    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Signature for an incident->runbook decision pair, used by the L2
/// learning loop's PatternStats bucket.
pub fn decision_pattern_signature(incident_type: &str, check_type: &str, runbook_id: &str) -> String {
    let joined = format!(
        "{}:{}:{}",
        incident_type.trim().to_lowercase(),
        check_type.trim().to_lowercase(),
        runbook_id.trim().to_lowercase()
    );
    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_yield_identical_signature() {
        let a = pattern_signature("backup_failure", "nightly", "error at 2026-01-01T00:00:00Z host 10.0.0.5 code 42");
        let b = pattern_signature("backup_failure", "nightly", "error at 2026-02-14T11:22:33Z host 10.1.2.9 code 99");
        assert_eq!(a, b);
    }

    #[test]
    fn different_incident_types_diverge() {
        let a = pattern_signature("backup_failure", "nightly", "timeout");
        let b = pattern_signature("disk_full", "nightly", "timeout");
        assert_ne!(a, b);
    }

    #[test]
    fn signature_is_16_hex_chars() {
        let sig = pattern_signature("x", "y", "z");
        assert_eq!(sig.len(), 16);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
