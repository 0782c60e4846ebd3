//! `keyData` normalization. The column is opaque to storage; handlers accept
//! three encodings: a raw string (bare API key or base64 JSON), a
//! `{"key": "<base64 JSON>"}` wrapper, or a native JSON object.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value as JsonValue;

use fleetgate_provider_core::AttemptError;

/// Decode into a JSON object where possible; bare API keys stay strings.
pub(crate) fn normalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            if map.len() == 1
                && let Some(JsonValue::String(wrapped)) = map.get("key")
                && let Some(decoded) = decode_base64_json(wrapped)
            {
                return decoded;
            }
            value.clone()
        }
        JsonValue::String(raw) => decode_base64_json(raw)
            .or_else(|| {
                serde_json::from_str::<JsonValue>(raw)
                    .ok()
                    .filter(JsonValue::is_object)
            })
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

/// A bare API key out of any of the accepted encodings.
pub(crate) fn api_key(value: &JsonValue) -> Result<String, AttemptError> {
    let normalized = normalize(value);
    let key = match &normalized {
        JsonValue::String(raw) => Some(raw.clone()),
        JsonValue::Object(map) => map
            .get("api_key")
            .or_else(|| map.get("key"))
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        _ => None,
    };
    key.filter(|key| !key.trim().is_empty())
        .ok_or_else(|| AttemptError::InvalidKeyData("missing api key".to_string()))
}

fn decode_base64_json(raw: &str) -> Option<JsonValue> {
    let bytes = STANDARD.decode(raw.trim()).ok()?;
    serde_json::from_slice::<JsonValue>(&bytes)
        .ok()
        .filter(JsonValue::is_object)
}
