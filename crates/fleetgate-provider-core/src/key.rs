use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use fleetgate_common::Protocol;

use crate::model_table::{ModelQuery, ModelSpec, apply_overrides};

/// Bucket key used when the provider throttles per key rather than per model.
pub const GLOBAL_BUCKET: &str = "_global_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrottleMode {
    #[serde(rename = "BY_KEY")]
    ByKey,
    #[serde(rename = "BY_MODEL")]
    ByModel,
}

/// Runtime view of a provider row: read-only for the life of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub throttle_mode: ThrottleMode,
    pub min_throttle_minutes: i64,
    pub max_throttle_minutes: i64,
    pub models: Vec<ModelSpec>,
    pub native_protocols: Vec<Protocol>,
}

impl ProviderConfig {
    pub fn min_throttle_ms(&self) -> i64 {
        self.min_throttle_minutes * 60_000
    }

    pub fn max_throttle_ms(&self) -> i64 {
        self.max_throttle_minutes * 60_000
    }
}

/// Per-bucket backoff state, persisted as JSON on the key row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleBucket {
    /// Unix ms after which the bucket is usable again; 0 = healthy.
    pub expiration: i64,
    pub current_backoff_duration: i64,
    pub consecutive_failures: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ThrottleBucket {
    pub fn healthy(min_ms: i64) -> Self {
        Self {
            expiration: 0,
            current_backoff_duration: min_ms,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// The healthy sentinel is equivalent to an absent entry.
    pub fn is_healthy_sentinel(&self, min_ms: i64) -> bool {
        self.expiration == 0
            && self.consecutive_failures == 0
            && self.current_backoff_duration == min_ms
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThrottleData(pub BTreeMap<String, ThrottleBucket>);

impl ThrottleData {
    pub fn bucket(&self, key: &str) -> Option<&ThrottleBucket> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Runtime view of a key row, shared mutably within one request's attempt
/// loop. Handlers mutate `key_data` after credential refresh; the throttle
/// engine mutates `throttle` and `permanently_failed`.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub id: i64,
    pub provider: Arc<ProviderConfig>,
    pub key_data: JsonValue,
    pub throttle: ThrottleData,
    pub permanently_failed: bool,
    pub paused: bool,
    pub notes: Option<String>,
    pub base_url: Option<String>,
    pub available_models: Option<Vec<String>>,
}

pub type SharedKey = Arc<Mutex<KeyRecord>>;

pub fn share_key(record: KeyRecord) -> SharedKey {
    Arc::new(Mutex::new(record))
}

impl KeyRecord {
    /// The provider model list after this key's `availableModels` overrides.
    pub fn effective_models(&self) -> Vec<ModelSpec> {
        apply_overrides(&self.provider.models, self.available_models.as_deref())
    }

    /// Resolve a request entry against this key's effective model list.
    /// `None` when the key cannot serve the requested model at all.
    pub fn resolve_model(&self, query: &ModelQuery) -> Option<String> {
        if let Some(provider) = &query.provider
            && *provider != self.provider.name
        {
            return None;
        }
        self.effective_models()
            .iter()
            .find_map(|spec| spec.resolve(query).map(str::to_string))
    }

    /// The throttle bucket this key uses for a resolved base id.
    pub fn bucket_key(&self, base_id: &str) -> String {
        match self.provider.throttle_mode {
            ThrottleMode::ByKey => GLOBAL_BUCKET.to_string(),
            ThrottleMode::ByModel => base_id.to_string(),
        }
    }
}
