//! Diagnostic call logging with credential redaction.
//!
//! When the server runs with `debug` enabled, every call is logged as method
//! name, request and outcome.  Any `secrets` map in the payload is replaced by
//! [`STRIPPED`] before it reaches the log.

use serde_json::Value;
use tracing::{error, info};

use crate::message::CsiMessage;

/// Replacement text for redacted credential maps.
pub const STRIPPED: &str = "***stripped***";

const SECRETS_FIELD: &str = "secrets";

/// Render `msg` as JSON with every `secrets` field redacted.
pub fn strip_secrets(msg: &CsiMessage) -> String {
    match serde_json::to_value(msg) {
        Ok(mut value) => {
            redact(&mut value);
            value.to_string()
        }
        Err(e) => format!("<unserializable: {e}>"),
    }
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if key == SECRETS_FIELD {
                    *field = Value::String(STRIPPED.to_owned());
                } else {
                    redact(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Log a request before dispatch.
pub fn log_request(method: &str, request: &CsiMessage) {
    info!(method, "[rpc] request addr");
    info!(method, request = %strip_secrets(request), "[rpc] request");
}

/// Log the outcome of a call.  Does not alter `response`.
pub fn log_response(method: &str, response: &CsiMessage) {
    match response {
        CsiMessage::Error(e) => error!(method, code = %e.code(), error = %e, "[rpc] error"),
        other => info!(method, response = %strip_secrets(other), "[rpc] response"),
    }
}
