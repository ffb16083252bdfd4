//! Condition evaluation over an incident's raw JSON payload.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    Regex,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field_path: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

/// Walk a dotted path (`"a.b.c"`) into a JSON value, returning `None`
/// at the first missing segment.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn numeric_cmp(field: &Value, target: &Value, op: Operator) -> bool {
    match (as_f64(field), as_f64(target)) {
        (Some(a), Some(b)) => match op {
            Operator::Gt => a > b,
            Operator::Lt => a < b,
            Operator::Ge => a >= b,
            Operator::Le => a <= b,
            _ => false,
        },
        _ => false,
    }
}

impl Condition {
    pub fn matches(&self, raw_data: &Value) -> bool {
        let field = resolve_path(raw_data, &self.field_path);

        match self.operator {
            Operator::Exists => field.is_some(),
            Operator::Eq => field.is_some_and(|f| f == &self.value),
            Operator::Neq => match field {
                Some(f) => f != &self.value,
                None => true,
            },
            Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
                field.is_some_and(|f| numeric_cmp(f, &self.value, self.operator))
            }
            Operator::Contains => match field {
                Some(Value::String(s)) => self.value.as_str().is_some_and(|needle| s.contains(needle)),
                Some(Value::Array(items)) => items.contains(&self.value),
                _ => false,
            },
            Operator::Regex => match (field.and_then(Value::as_str), self.value.as_str()) {
                (Some(text), Some(pattern)) => Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false),
                _ => false,
            },
        }
    }
}

pub fn matches_all(conditions: &[Condition], raw_data: &Value) -> bool {
    conditions.iter().all(|c| c.matches(raw_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_dotted_path() {
        let data = json!({"service": {"name": "nginx"}});
        assert_eq!(resolve_path(&data, "service.name"), Some(&json!("nginx")));
        assert_eq!(resolve_path(&data, "service.missing"), None);
    }

    #[test]
    fn eq_and_neq_operators() {
        let data = json!({"severity": "high"});
        let eq = Condition { field_path: "severity".into(), operator: Operator::Eq, value: json!("high") };
        let neq = Condition { field_path: "severity".into(), operator: Operator::Neq, value: json!("low") };
        assert!(eq.matches(&data));
        assert!(neq.matches(&data));
    }

    #[test]
    fn numeric_comparison_operators() {
        let data = json!({"disk_pct_used": 92});
        let gt = Condition { field_path: "disk_pct_used".into(), operator: Operator::Gt, value: json!(90) };
        let lt = Condition { field_path: "disk_pct_used".into(), operator: Operator::Lt, value: json!(90) };
        assert!(gt.matches(&data));
        assert!(!lt.matches(&data));
    }

    #[test]
    fn contains_and_regex_operators() {
        let data = json!({"message": "connection refused on port 443"});
        let contains = Condition { field_path: "message".into(), operator: Operator::Contains, value: json!("refused") };
        let regex = Condition { field_path: "message".into(), operator: Operator::Regex, value: json!(r"port \d+") };
        assert!(contains.matches(&data));
        assert!(regex.matches(&data));
    }

    #[test]
    fn exists_operator_checks_presence() {
        let data = json!({"a": 1});
        let present = Condition { field_path: "a".into(), operator: Operator::Exists, value: Value::Null };
        let absent = Condition { field_path: "b".into(), operator: Operator::Exists, value: Value::Null };
        assert!(present.matches(&data));
        assert!(!absent.matches(&data));
    }

    #[test]
    fn matches_all_requires_every_condition() {
        let data = json!({"a": 1, "b": 2});
        let conditions = vec![
            Condition { field_path: "a".into(), operator: Operator::Eq, value: json!(1) },
            Condition { field_path: "b".into(), operator: Operator::Eq, value: json!(3) },
        ];
        assert!(!matches_all(&conditions, &data));
    }
}
