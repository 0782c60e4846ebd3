//! Code-Assist envelope handling. The `v1internal` endpoints wrap every
//! payload as `{"response": <real>}`, for buffered JSON bodies and for each
//! SSE `data:` line alike.

use serde_json::Value as JsonValue;

/// Unwrap a buffered JSON body. Payloads without the envelope pass through
/// untouched (error bodies, for example, are not wrapped).
pub fn unwrap_body(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut object) => match object.remove("response") {
            Some(inner) => inner,
            None => JsonValue::Object(object),
        },
        other => other,
    }
}

/// Unwrap one SSE `data:` payload. Non-JSON payloads (`[DONE]` included) pass
/// through unchanged.
pub fn unwrap_data_line(data: &str) -> String {
    let Ok(value) = serde_json::from_str::<JsonValue>(data) else {
        return data.to_string();
    };
    serde_json::to_string(&unwrap_body(value)).unwrap_or_else(|_| data.to_string())
}
