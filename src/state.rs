use evalexpr::{eval_with_context_mut, Context, ContextWithMutableVariables, HashMapContext, Value};
use log::{debug, error};
use crate::{config::{EvaluationRule, StateQuerySpec, DEFAULT_RULE}, error::WebhookError, request::WebhookResponse};

/// Name of the variable a rule sets to "on" or "off".
const STATE_VAR: &str = "state";
/// Prefix of the variables holding response headers, e.g. `header.content_type`.
const HEADER_PREFIX: &str = "header";
/// Prefix of the variables holding the leaves of a JSON body, e.g. `json.switch.output`.
const JSON_PREFIX: &str = "json";

/// Decides whether the PSU is on from the state query's response.
/// Any problem with the rule counts as "off".
pub fn evaluate(response: &WebhookResponse, spec: &StateQuerySpec) -> bool {
    if spec.on_if_ok {
        return response.is_success();
    }

    debug!("Using the evaluation rule to detect the PSU state");
    match run_rule(response, spec.evaluation_rule.as_ref()) {
        Ok(state) => state == "on",
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}

/// Runs the rule against the response and returns whatever it left in `state`.
fn run_rule(response: &WebhookResponse, rule: Option<&EvaluationRule>) -> Result<String, WebhookError> {
    let rule = match rule {
        Some(EvaluationRule::Text(text)) if !text.is_empty() => text.as_str(),
        Some(EvaluationRule::Invalid(value)) => return Err(WebhookError::InvalidRule(value.to_string())),
        _ => DEFAULT_RULE,
    };

    let mut context: HashMapContext = HashMapContext::new();
    for (name, value) in bindings(response) {
        context.set_value(name, value)
            .map_err(|e| WebhookError::EvaluationRule(e.to_string()))?;
    }

    eval_with_context_mut(rule, &mut context)
        .map_err(|e| WebhookError::EvaluationRule(e.to_string()))?;

    match context.get_value(STATE_VAR) {
        Some(Value::String(state)) => Ok(state.clone()),
        other => Err(WebhookError::EvaluationRule(format!("`{}` ended up as {:?}", STATE_VAR, other))),
    }
}

/// Variables a rule can read. `-` in header names becomes `_` since it is the minus operator.
fn bindings(response: &WebhookResponse) -> Vec<(String, Value)> {
    let mut bindings: Vec<(String, Value)> = vec![
        ("status".to_string(), Value::Int(i64::from(response.status))),
        ("ok".to_string(), Value::Boolean(response.is_success())),
        ("body".to_string(), Value::String(response.body.clone())),
    ];

    for (name, value) in &response.headers {
        bindings.push((format!("{}.{}", HEADER_PREFIX, name.replace('-', "_")), Value::String(value.clone())));
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&response.body) {
        json_leaves(JSON_PREFIX.to_string(), &json, &mut bindings);
    }

    bindings.push((STATE_VAR.to_string(), Value::String("off".to_string())));
    bindings
}

/// Flattens a JSON document into one variable per scalar, keyed by its dotted path.
/// Array elements are addressed by index, e.g. `json.outputs.0`.
fn json_leaves(path: String, json: &serde_json::Value, out: &mut Vec<(String, Value)>) {
    use serde_json::Value as Json;

    let value = match json {
        Json::Null => Value::Empty,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Int(i),
            (None, Some(f)) => Value::Float(f),
            (None, None) => return,
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                json_leaves(format!("{}.{}", path, i), item, out);
            }
            return;
        }
        Json::Object(map) => {
            for (key, item) in map {
                json_leaves(format!("{}.{}", path, key), item, out);
            }
            return;
        }
    };
    out.push((path, value));
}
