use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct SuggestedConstraints {
    pub constraints: Value,
    pub reasons: Vec<String>,
}

const FREE_TEXT_KEYS: &[&str] = &["note", "comment", "description", "reason", "message"];

/// Classifies each top-level field of a pending action's `tool_args_json`
/// into a suggested constraint, the way `mqk-promotion::evaluator`
/// classifies a candidate against thresholds and emits reasons — here the
/// "thresholds" are simple per-field sensitivity rules instead of
/// promotion gates (§4.J).
pub fn suggest_constraints_for_args(tool_args: &Value) -> SuggestedConstraints {
    let mut constraints = serde_json::Map::new();
    let mut reasons = Vec::new();

    let Some(fields) = tool_args.as_object() else {
        return SuggestedConstraints { constraints: Value::Object(constraints), reasons };
    };

    for (key, value) in fields {
        if FREE_TEXT_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            reasons.push(format!("field '{key}' treated as free text, no constraint suggested"));
            continue;
        }

        match value {
            Value::Number(n) => {
                constraints.insert(key.clone(), serde_json::json!({ "max": n }));
                reasons.push(format!("field '{key}' is numeric, suggest upper bound {n}"));
            }
            Value::String(s) => {
                constraints.insert(key.clone(), serde_json::json!({ "equals": s }));
                reasons.push(format!("field '{key}' suggested exact match to limit scope"));
            }
            Value::Bool(b) => {
                constraints.insert(key.clone(), serde_json::json!({ "equals": b }));
                reasons.push(format!("field '{key}' suggested exact match to limit scope"));
            }
            Value::Array(_) | Value::Object(_) => {
                reasons.push(format!("field '{key}' is a complex type, no constraint suggested"));
            }
            Value::Null => {
                reasons.push(format!("field '{key}' is null, no constraint suggested"));
            }
        }
    }

    SuggestedConstraints { constraints: Value::Object(constraints), reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_field_gets_max_constraint() {
        let args = serde_json::json!({"amount": 500});
        let suggested = suggest_constraints_for_args(&args);
        assert_eq!(suggested.constraints["amount"]["max"], 500);
    }

    #[test]
    fn free_text_fields_are_skipped() {
        let args = serde_json::json!({"note": "please approve"});
        let suggested = suggest_constraints_for_args(&args);
        assert!(suggested.constraints.as_object().unwrap().is_empty());
        assert!(suggested.reasons[0].contains("free text"));
    }

    #[test]
    fn string_field_suggests_exact_match() {
        let args = serde_json::json!({"recipient": "user123"});
        let suggested = suggest_constraints_for_args(&args);
        assert_eq!(suggested.constraints["recipient"]["equals"], "user123");
    }

    #[test]
    fn complex_fields_produce_no_constraint() {
        let args = serde_json::json!({"attachments": [1, 2, 3]});
        let suggested = suggest_constraints_for_args(&args);
        assert!(suggested.constraints.as_object().unwrap().is_empty());
    }
}
