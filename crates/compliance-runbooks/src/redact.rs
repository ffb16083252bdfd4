//! Output redaction pass.
//!
//! `original_source/.../runbooks/linux/executor.py` calls a
//! `PHIScrubber.scrub(text) -> (text, result)` before stdout/stderr are
//! persisted, but `phi_scrubber.py` itself isn't present anywhere in
//! the retrieval pack. The patterns here are built from that call-site
//! contract plus the HIPAA identifier categories `spec.md` §4.5 names
//! (emails, SSNs, credential-shaped substrings): SSN, US phone, email,
//! credit card, and a generic `key=value`/`Bearer <token>` credential
//! shape, mirroring the same regex-over-string technique
//! `compliance_common::pattern` already uses for signature
//! normalization.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrubResult {
    pub phi_scrubbed: bool,
    pub patterns_matched: Vec<&'static str>,
}

struct Pattern {
    name: &'static str,
    regex: Regex,
    replacement: &'static str,
}

fn patterns() -> &'static Vec<Pattern> {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Pattern { name: "ssn", regex: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(), replacement: "[REDACTED-SSN]" },
            Pattern {
                name: "email",
                regex: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
                replacement: "[REDACTED-EMAIL]",
            },
            Pattern {
                name: "phone",
                regex: Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b").unwrap(),
                replacement: "[REDACTED-PHONE]",
            },
            Pattern {
                name: "credit_card",
                regex: Regex::new(r"\b(?:\d[ -]*?){13,16}\b").unwrap(),
                replacement: "[REDACTED-CARD]",
            },
            Pattern {
                name: "credential",
                regex: Regex::new(r"(?i)\b(password|passwd|secret|token|api[_-]?key)\s*[:=]\s*\S+").unwrap(),
                replacement: "[REDACTED-CREDENTIAL]",
            },
            Pattern {
                name: "bearer_token",
                regex: Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9._-]+").unwrap(),
                replacement: "[REDACTED-CREDENTIAL]",
            },
        ]
    })
}

/// Scrub PHI/PII-shaped substrings from `text`, returning the
/// sanitized text plus a record of which pattern categories fired
/// (for evidence annotation, never the matched text itself).
pub fn scrub(text: &str) -> (String, ScrubResult) {
    let mut scrubbed = text.to_string();
    let mut matched = Vec::new();

    for pattern in patterns() {
        if pattern.regex.is_match(&scrubbed) {
            scrubbed = pattern.regex.replace_all(&scrubbed, pattern.replacement).to_string();
            matched.push(pattern.name);
        }
    }

    (scrubbed, ScrubResult { phi_scrubbed: !matched.is_empty(), patterns_matched: matched })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_ssn() {
        let (out, result) = scrub("patient ssn 123-45-6789 on file");
        assert!(!out.contains("123-45-6789"));
        assert!(result.phi_scrubbed);
        assert!(result.patterns_matched.contains(&"ssn"));
    }

    #[test]
    fn scrubs_email_and_credential() {
        let (out, result) = scrub("contact admin@example.com, password=hunter2");
        assert!(!out.contains("admin@example.com"));
        assert!(!out.contains("hunter2"));
        assert_eq!(result.patterns_matched.len(), 2);
    }

    #[test]
    fn leaves_clean_text_untouched() {
        let (out, result) = scrub("service nginx restarted successfully");
        assert_eq!(out, "service nginx restarted successfully");
        assert!(!result.phi_scrubbed);
        assert!(result.patterns_matched.is_empty());
    }
}
