//! Turns non-2xx provider responses into [`CrmError`] values that keep the
//! provider's own error text.

use serde_json::Value;

use teamsforce_core::domain::token::Provider;
use teamsforce_core::errors::CrmError;

use crate::transport::ApiResponse;

pub fn classify_failure(provider: Provider, response: &ApiResponse) -> CrmError {
    let (code, message) = response
        .body
        .as_ref()
        .and_then(extract_error)
        .unwrap_or_else(|| (None, default_message(response.status)));

    CrmError::Upstream { provider, status: Some(response.status), code, message }
}

/// Understands Salesforce REST (`[{"message", "errorCode"}]`), Graph
/// (`{"error": {"code", "message"}}`) and OAuth (`{"error", "error_description"}`) bodies.
fn extract_error(body: &Value) -> Option<(Option<String>, String)> {
    match body {
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("message").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                return None;
            }
            let code = items
                .iter()
                .find_map(|item| item.get("errorCode").and_then(Value::as_str))
                .map(str::to_owned);
            Some((code, messages.join("; ")))
        }
        Value::Object(map) => match map.get("error") {
            Some(Value::Object(error)) => {
                let message = error.get("message").and_then(Value::as_str)?.to_owned();
                let code = error.get("code").and_then(Value::as_str).map(str::to_owned);
                Some((code, message))
            }
            Some(Value::String(code)) => {
                let message = map
                    .get("error_description")
                    .and_then(Value::as_str)
                    .unwrap_or(code)
                    .to_owned();
                Some((Some(code.clone()), message))
            }
            _ => map
                .get("message")
                .and_then(Value::as_str)
                .map(|message| (None, message.to_owned())),
        },
        Value::String(text) if !text.trim().is_empty() => {
            Some((None, text.chars().take(300).collect()))
        }
        _ => None,
    }
}

fn default_message(status: u16) -> String {
    match status {
        400 => "the request was rejected as invalid".to_owned(),
        403 => "you do not have permission to do that".to_owned(),
        404 => "the requested record was not found".to_owned(),
        429 => "rate limited, try again shortly".to_owned(),
        500..=599 => format!("the service is unavailable (HTTP {status})"),
        other => format!("unexpected HTTP {other}"),
    }
}
