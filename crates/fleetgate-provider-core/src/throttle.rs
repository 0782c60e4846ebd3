//! Per-request throttle engine.
//!
//! One engine is built per attempt loop over the authenticated user's keys.
//! Handlers report outcomes through the `record_*` feedback methods; the
//! router drains the buffer once after the loop, which bounds persistence to
//! a single store write per touched key.
//!
//! All state is request-local; locks are never held across await points, so
//! plain `std::sync` primitives suffice.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value as JsonValue;

use fleetgate_common::now_unix_ms;

use crate::key::{KeyRecord, SharedKey, ThrottleBucket, share_key};

/// Consecutive non-rate-limit failures that trip a backoff window.
const FAILURE_THRESHOLD: i64 = 5;

/// Staged mutation for one key row. Fields left `None` are untouched;
/// `throttle_data: Some(Null)` clears the column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyUpdate {
    pub throttle_data: Option<JsonValue>,
    pub key_data: Option<JsonValue>,
    pub permanently_failed: Option<bool>,
}

/// Outcome report for one upstream attempt on one bucket.
#[derive(Debug, Clone, Default)]
pub struct ModelStatus {
    pub success: bool,
    pub rate_limited: bool,
    pub last_error: Option<String>,
    /// Absolute unix-ms reset hint from the upstream, honored when it lies
    /// beyond the computed backoff expiration.
    pub reset_at_ms: Option<i64>,
}

pub struct ThrottleEngine {
    keys: Vec<SharedKey>,
    pending: Mutex<BTreeMap<i64, KeyUpdate>>,
}

impl ThrottleEngine {
    pub fn new(records: Vec<KeyRecord>) -> Self {
        Self {
            keys: records.into_iter().map(share_key).collect(),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn keys(&self) -> &[SharedKey] {
        &self.keys
    }

    /// Order the given `(key, resolved base id)` candidates for attempting.
    ///
    /// Paused, permanently failed and currently-throttled keys are dropped;
    /// survivors are sorted ascending by consecutive-failure count (ties keep
    /// insertion order). Iteration is lazy: a key that became throttled by an
    /// earlier attempt in the same loop is skipped at yield time.
    pub fn eligible_keys(&self, candidates: Vec<(SharedKey, String)>) -> EligibleKeys {
        let now = now_unix_ms();
        let mut survivors: Vec<(SharedKey, String, i64)> = Vec::new();
        for (key, base_id) in candidates {
            let failures = {
                let record = key.lock().expect("key lock");
                if record.paused || record.permanently_failed {
                    continue;
                }
                let bucket_key = record.bucket_key(&base_id);
                match record.throttle.bucket(&bucket_key) {
                    Some(bucket) if bucket.expiration > now => continue,
                    Some(bucket) => bucket.consecutive_failures,
                    None => 0,
                }
            };
            survivors.push((key, base_id, failures));
        }
        survivors.sort_by_key(|(_, _, failures)| *failures);
        EligibleKeys {
            ordered: survivors
                .into_iter()
                .map(|(key, base_id, _)| (key, base_id))
                .collect(),
        }
    }

    /// Stage the key's (already mutated) in-memory `key_data` for persistence.
    pub fn record_key_data_updated(&self, key: &SharedKey) {
        let (id, key_data) = {
            let record = key.lock().expect("key lock");
            (record.id, record.key_data.clone())
        };
        let mut pending = self.pending.lock().expect("pending lock");
        pending.entry(id).or_default().key_data = Some(key_data);
    }

    /// Flip the sticky flag in memory and stage it. The key drops out of all
    /// later selections for this request and, once committed, for every
    /// request after it.
    pub fn record_permanently_failed(&self, key: &SharedKey) {
        let id = {
            let mut record = key.lock().expect("key lock");
            record.permanently_failed = true;
            record.id
        };
        let mut pending = self.pending.lock().expect("pending lock");
        pending.entry(id).or_default().permanently_failed = Some(true);
    }

    /// Fold one attempt outcome into the bucket for `base_id`.
    pub fn record_model_status(&self, key: &SharedKey, base_id: &str, status: ModelStatus) {
        let now = now_unix_ms();
        let staged = {
            let mut record = key.lock().expect("key lock");
            let min_ms = record.provider.min_throttle_ms();
            let max_ms = record.provider.max_throttle_ms();
            let bucket_key = record.bucket_key(base_id);
            let old = record.throttle.0.get(&bucket_key).cloned();

            let next = if status.rate_limited {
                let mut bucket = backed_off(old.as_ref(), now, min_ms, max_ms);
                if let Some(reset) = status.reset_at_ms
                    && reset > bucket.expiration
                {
                    bucket.expiration = reset;
                }
                bucket.last_error = status.last_error.clone();
                Some(bucket)
            } else if status.success {
                match old {
                    Some(ref bucket) if is_unhealthy(bucket, now, min_ms) => {
                        Some(ThrottleBucket::healthy(min_ms))
                    }
                    // Already healthy: nothing to write.
                    _ => return,
                }
            } else {
                let mut bucket = old
                    .clone()
                    .unwrap_or_else(|| ThrottleBucket::healthy(min_ms));
                bucket.consecutive_failures += 1;
                bucket.last_error = status.last_error.clone();
                if bucket.consecutive_failures >= FAILURE_THRESHOLD {
                    let mut tripped = backed_off(Some(&bucket), now, min_ms, max_ms);
                    tripped.last_error = status.last_error.clone();
                    bucket = tripped;
                }
                Some(bucket)
            };

            let Some(next) = next else { return };
            if next.is_healthy_sentinel(min_ms) {
                record.throttle.0.remove(&bucket_key);
            } else {
                record.throttle.0.insert(bucket_key, next);
            }

            let staged = if record.throttle.is_empty() {
                JsonValue::Null
            } else {
                serde_json::to_value(&record.throttle).unwrap_or(JsonValue::Null)
            };
            (record.id, staged)
        };

        let mut pending = self.pending.lock().expect("pending lock");
        pending.entry(staged.0).or_default().throttle_data = Some(staged.1);
    }

    /// Drain the buffer: at most one entry per key id, in key order.
    pub fn take_pending(&self) -> Vec<(i64, KeyUpdate)> {
        let mut pending = self.pending.lock().expect("pending lock");
        std::mem::take(&mut *pending).into_iter().collect()
    }
}

fn is_unhealthy(bucket: &ThrottleBucket, now: i64, min_ms: i64) -> bool {
    bucket.expiration > now
        || bucket.consecutive_failures > 0
        || bucket.current_backoff_duration > min_ms
}

/// The exponential transition: a healthy-or-absent bucket starts at the
/// minimum window; anything else doubles and clamps at the maximum.
fn backed_off(old: Option<&ThrottleBucket>, now: i64, min_ms: i64, max_ms: i64) -> ThrottleBucket {
    let backoff = match old {
        Some(bucket) if bucket.expiration != 0 || bucket.current_backoff_duration > min_ms => {
            (bucket.current_backoff_duration * 2).min(max_ms)
        }
        _ => min_ms,
    };
    ThrottleBucket {
        expiration: now + backoff,
        current_backoff_duration: backoff,
        consecutive_failures: 0,
        last_error: None,
    }
}

/// Ordered lazy iterator produced by [`ThrottleEngine::eligible_keys`].
pub struct EligibleKeys {
    ordered: VecDeque<(SharedKey, String)>,
}

impl EligibleKeys {
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl Iterator for EligibleKeys {
    type Item = (SharedKey, String);

    fn next(&mut self) -> Option<Self::Item> {
        let now = now_unix_ms();
        while let Some((key, base_id)) = self.ordered.pop_front() {
            let throttled = {
                let record = key.lock().expect("key lock");
                if record.permanently_failed || record.paused {
                    continue;
                }
                let bucket_key = record.bucket_key(&base_id);
                record
                    .throttle
                    .bucket(&bucket_key)
                    .is_some_and(|bucket| bucket.expiration > now)
            };
            if !throttled {
                return Some((key, base_id));
            }
        }
        None
    }
}
