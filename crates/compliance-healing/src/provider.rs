//! L2 planning: prompts an LLM provider with the runbook catalog and
//! incident context, parses its verdict, and enforces the confidence
//! floor below which a decision is forced to human review.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{HealingError, HealingResult};

pub const CONFIDENCE_FLOOR: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2Decision {
    pub runbook_id: Option<String>,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub requires_human_review: bool,
}

impl L2Decision {
    fn human_review() -> Self {
        Self { runbook_id: None, reasoning: "no provider available".into(), confidence: 0.0, alternatives: vec![], requires_human_review: true }
    }

    /// Whether this decision clears the bar for autonomous execution.
    pub fn eligible_for_execution(&self) -> bool {
        self.runbook_id.is_some() && !self.requires_human_review && self.confidence >= CONFIDENCE_FLOOR
    }
}

/// One LLM backend in the fallback chain (Azure OpenAI, OpenAI,
/// Anthropic, ...). Implementations own their own HTTP client and
/// auth; the planner only needs a prompt in, completion text out.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> HealingResult<String>;
}

pub struct L2Planner {
    providers: Vec<Box<dyn LlmProvider>>,
    timeout: Duration,
}

impl L2Planner {
    pub fn new(providers: Vec<Box<dyn LlmProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn is_available(&self) -> bool {
        !self.providers.is_empty()
    }

    pub async fn analyze(
        &self,
        site: &str,
        host: &str,
        incident_type: &str,
        severity: &str,
        raw_data: &Value,
        catalog: &[Value],
    ) -> L2Decision {
        if self.providers.is_empty() {
            return L2Decision::human_review();
        }

        let system_prompt = build_system_prompt(catalog);
        let user_prompt = build_incident_prompt(site, host, incident_type, severity, raw_data);

        for provider in &self.providers {
            let attempt = tokio::time::timeout(self.timeout, provider.complete(&system_prompt, &user_prompt)).await;
            let Ok(Ok(text)) = attempt else {
                tracing::warn!(provider = provider.name(), "L2 provider unavailable, trying next");
                continue;
            };
            match parse_llm_response(&text) {
                Ok(mut decision) => {
                    let known_ids: Vec<&str> = catalog.iter().filter_map(|c| c["id"].as_str()).collect();
                    if let Some(id) = &decision.runbook_id {
                        if !known_ids.contains(&id.as_str()) {
                            decision.runbook_id = None;
                            decision.confidence = 0.0;
                            decision.requires_human_review = true;
                        }
                    }
                    if decision.confidence < CONFIDENCE_FLOOR {
                        decision.requires_human_review = true;
                    }
                    return decision;
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "L2 response unparseable, trying next");
                    continue;
                }
            }
        }

        L2Decision::human_review()
    }
}

pub fn build_system_prompt(catalog: &[Value]) -> String {
    let catalog_json = serde_json::to_string_pretty(catalog).unwrap_or_default();
    format!(
        "You are a compliance remediation planner for a healthcare clinic appliance. \
         Choose at most one runbook from the catalog below to resolve the incident, or \
         defer to a human if none applies safely.\n\nAvailable runbooks:\n{catalog_json}\n\n\
         Respond with a single JSON object: {{\"runbook_id\": string|null, \"reasoning\": string, \
         \"confidence\": number between 0 and 1, \"alternatives\": [string], \
         \"requires_human_review\": boolean}}."
    )
}

pub fn build_incident_prompt(site: &str, host: &str, incident_type: &str, severity: &str, raw_data: &Value) -> String {
    format!(
        "Incident:\nsite: {site}\nhost: {host}\nincident_type: {incident_type}\nseverity: {severity}\ndetails: {raw_data}"
    )
}

/// Extract the JSON decision object from provider output, tolerating
/// a surrounding markdown fence and stray prose around the object.
pub fn parse_llm_response(text: &str) -> HealingResult<L2Decision> {
    let stripped = strip_markdown_fence(text);

    if let Ok(decision) = serde_json::from_str::<L2Decision>(&stripped) {
        return Ok(decision);
    }

    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if end > start {
            if let Ok(decision) = serde_json::from_str::<L2Decision>(&stripped[start..=end]) {
                return Ok(decision);
            }
        }
    }

    Err(HealingError::Provider(format!("could not parse L2 response: {text}")))
}

fn strip_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().trim_end_matches("```").trim().to_string()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        let raw = r#"{"runbook_id": "LIN-SSH-001", "reasoning": "match", "confidence": 0.9, "alternatives": [], "requires_human_review": false}"#;
        let decision = parse_llm_response(raw).unwrap();
        assert_eq!(decision.runbook_id.as_deref(), Some("LIN-SSH-001"));
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"runbook_id\": null, \"reasoning\": \"unsure\", \"confidence\": 0.2, \"alternatives\": [], \"requires_human_review\": true}\n```";
        let decision = parse_llm_response(raw).unwrap();
        assert!(decision.runbook_id.is_none());
        assert!(decision.requires_human_review);
    }

    #[test]
    fn parses_json_surrounded_by_prose() {
        let raw = "Here is my analysis: {\"runbook_id\": \"X\", \"reasoning\": \"r\", \"confidence\": 0.8, \"alternatives\": [], \"requires_human_review\": false} Let me know if you need more.";
        let decision = parse_llm_response(raw).unwrap();
        assert_eq!(decision.runbook_id.as_deref(), Some("X"));
    }

    #[test]
    fn low_confidence_marks_eligible_false() {
        let decision = L2Decision { runbook_id: Some("X".into()), reasoning: "r".into(), confidence: 0.5, alternatives: vec![], requires_human_review: false };
        assert!(!decision.eligible_for_execution());
    }

    #[test]
    fn unparseable_text_errors() {
        assert!(parse_llm_response("not json at all").is_err());
    }

    #[test]
    fn system_prompt_includes_catalog_ids() {
        let catalog = vec![json!({"id": "LIN-SSH-001", "name": "n", "description": "d", "severity": "high"})];
        let prompt = build_system_prompt(&catalog);
        assert!(prompt.contains("LIN-SSH-001"));
    }
}
