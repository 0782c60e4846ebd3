use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use fleetgate_common::{Protocol, now_unix_ms};
use fleetgate_provider_core::{
    GLOBAL_BUCKET, KeyRecord, ModelSpec, ModelStatus, ProviderConfig, SharedKey, ThrottleBucket,
    ThrottleData, ThrottleEngine, ThrottleMode,
};

fn provider(mode: ThrottleMode) -> Arc<ProviderConfig> {
    Arc::new(ProviderConfig {
        id: 1,
        name: "GEMINI_CODE_ASSIST".to_string(),
        display_name: "Gemini Code Assist".to_string(),
        throttle_mode: mode,
        min_throttle_minutes: 1,
        max_throttle_minutes: 15,
        models: vec![ModelSpec::parse("gemini-2.5-flash$fast")],
        native_protocols: vec![Protocol::Gemini],
    })
}

fn key(id: i64, provider: Arc<ProviderConfig>) -> KeyRecord {
    KeyRecord {
        id,
        provider,
        key_data: JsonValue::Null,
        throttle: ThrottleData::default(),
        permanently_failed: false,
        paused: false,
        notes: None,
        base_url: None,
        available_models: None,
    }
}

fn engine_with(records: Vec<KeyRecord>) -> ThrottleEngine {
    ThrottleEngine::new(records)
}

fn candidates(engine: &ThrottleEngine, base: &str) -> Vec<(SharedKey, String)> {
    engine
        .keys()
        .iter()
        .map(|key| (key.clone(), base.to_string()))
        .collect()
}

fn bucket(key: &SharedKey, bucket_key: &str) -> Option<ThrottleBucket> {
    key.lock().unwrap().throttle.bucket(bucket_key).cloned()
}

#[test]
fn backoff_doubles_and_clamps() {
    let engine = engine_with(vec![key(1, provider(ThrottleMode::ByKey))]);
    let shared = engine.keys()[0].clone();

    let mut previous = 0;
    for expected in [60_000, 120_000, 240_000, 480_000, 900_000, 900_000] {
        let before = now_unix_ms();
        engine.record_model_status(
            &shared,
            "gemini-2.5-flash",
            ModelStatus {
                rate_limited: true,
                ..Default::default()
            },
        );
        let state = bucket(&shared, GLOBAL_BUCKET).unwrap();
        assert_eq!(state.current_backoff_duration, expected);
        assert!(state.current_backoff_duration >= previous);
        assert!(state.expiration >= before + expected);
        assert_eq!(state.consecutive_failures, 0);
        previous = state.current_backoff_duration;
    }
}

#[test]
fn reset_time_extends_computed_expiration() {
    let engine = engine_with(vec![key(1, provider(ThrottleMode::ByKey))]);
    let shared = engine.keys()[0].clone();
    let far = now_unix_ms() + 3_600_000;

    engine.record_model_status(
        &shared,
        "gemini-2.5-flash",
        ModelStatus {
            rate_limited: true,
            reset_at_ms: Some(far),
            ..Default::default()
        },
    );
    let state = bucket(&shared, GLOBAL_BUCKET).unwrap();
    assert_eq!(state.expiration, far);
    assert_eq!(state.current_backoff_duration, 60_000);
}

#[test]
fn success_resets_unhealthy_bucket_and_compacts() {
    let engine = engine_with(vec![key(1, provider(ThrottleMode::ByKey))]);
    let shared = engine.keys()[0].clone();

    engine.record_model_status(
        &shared,
        "gemini-2.5-flash",
        ModelStatus {
            rate_limited: true,
            ..Default::default()
        },
    );
    assert!(bucket(&shared, GLOBAL_BUCKET).is_some());

    engine.record_model_status(
        &shared,
        "gemini-2.5-flash",
        ModelStatus {
            success: true,
            ..Default::default()
        },
    );
    // Back to the healthy sentinel: the entry is removed and a null column
    // staged.
    assert!(bucket(&shared, GLOBAL_BUCKET).is_none());
    let pending = engine.take_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].1.throttle_data, Some(JsonValue::Null));
}

#[test]
fn success_on_healthy_bucket_writes_nothing() {
    let engine = engine_with(vec![key(1, provider(ThrottleMode::ByKey))]);
    let shared = engine.keys()[0].clone();
    engine.record_model_status(
        &shared,
        "gemini-2.5-flash",
        ModelStatus {
            success: true,
            ..Default::default()
        },
    );
    assert!(engine.take_pending().is_empty());
}

#[test]
fn fifth_consecutive_failure_trips_backoff() {
    let engine = engine_with(vec![key(1, provider(ThrottleMode::ByKey))]);
    let shared = engine.keys()[0].clone();

    for round in 1..=4 {
        engine.record_model_status(
            &shared,
            "gemini-2.5-flash",
            ModelStatus {
                last_error: Some("boom".to_string()),
                ..Default::default()
            },
        );
        let state = bucket(&shared, GLOBAL_BUCKET).unwrap();
        assert_eq!(state.consecutive_failures, round);
        assert_eq!(state.expiration, 0);
    }

    let before = now_unix_ms();
    engine.record_model_status(
        &shared,
        "gemini-2.5-flash",
        ModelStatus {
            last_error: Some("boom".to_string()),
            ..Default::default()
        },
    );
    let state = bucket(&shared, GLOBAL_BUCKET).unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.expiration >= before + 60_000);
}

#[test]
fn by_model_mode_isolates_buckets() {
    let engine = engine_with(vec![key(1, provider(ThrottleMode::ByModel))]);
    let shared = engine.keys()[0].clone();

    engine.record_model_status(
        &shared,
        "gemini-2.5-flash",
        ModelStatus {
            rate_limited: true,
            ..Default::default()
        },
    );
    assert!(bucket(&shared, "gemini-2.5-flash").is_some());
    assert!(bucket(&shared, "gemini-2.5-pro").is_none());

    // The other model's bucket is still eligible.
    let eligible: Vec<_> = engine
        .eligible_keys(candidates(&engine, "gemini-2.5-pro"))
        .collect();
    assert_eq!(eligible.len(), 1);
    let eligible: Vec<_> = engine
        .eligible_keys(candidates(&engine, "gemini-2.5-flash"))
        .collect();
    assert!(eligible.is_empty());
}

#[test]
fn iterator_orders_by_consecutive_failures() {
    let shared_provider = provider(ThrottleMode::ByKey);
    let mut second = key(2, shared_provider.clone());
    second.throttle.0.insert(
        GLOBAL_BUCKET.to_string(),
        ThrottleBucket {
            expiration: 0,
            current_backoff_duration: 60_000,
            consecutive_failures: 3,
            last_error: None,
        },
    );
    let engine = engine_with(vec![second, key(1, shared_provider)]);

    let order: Vec<i64> = engine
        .eligible_keys(candidates(&engine, "gemini-2.5-flash"))
        .map(|(key, _)| key.lock().unwrap().id)
        .collect();
    // Key 1 has zero failures and overtakes key 2 despite insertion order.
    assert_eq!(order, vec![1, 2]);
}

#[test]
fn iterator_rechecks_state_lazily() {
    let shared_provider = provider(ThrottleMode::ByKey);
    let engine = engine_with(vec![key(1, shared_provider.clone()), key(2, shared_provider)]);

    let mut iter = engine.eligible_keys(candidates(&engine, "gemini-2.5-flash"));
    let (first, base) = iter.next().unwrap();
    // The first attempt rate-limits key 1 and also throttles key 2 before it
    // is yielded.
    engine.record_model_status(
        &first,
        &base,
        ModelStatus {
            rate_limited: true,
            ..Default::default()
        },
    );
    engine.record_model_status(
        &engine.keys()[1].clone(),
        &base,
        ModelStatus {
            rate_limited: true,
            ..Default::default()
        },
    );
    assert!(iter.next().is_none());
}

#[test]
fn permanent_failure_is_sticky_within_request() {
    let shared_provider = provider(ThrottleMode::ByKey);
    let engine = engine_with(vec![key(1, shared_provider.clone()), key(2, shared_provider)]);
    let first = engine.keys()[0].clone();

    engine.record_permanently_failed(&first);

    let order: Vec<i64> = engine
        .eligible_keys(candidates(&engine, "gemini-2.5-flash"))
        .map(|(key, _)| key.lock().unwrap().id)
        .collect();
    assert_eq!(order, vec![2]);

    let pending = engine.take_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, 1);
    assert_eq!(pending[0].1.permanently_failed, Some(true));
}

#[test]
fn commit_buffer_is_one_entry_per_key() {
    let engine = engine_with(vec![key(1, provider(ThrottleMode::ByKey))]);
    let shared = engine.keys()[0].clone();

    for _ in 0..3 {
        engine.record_model_status(
            &shared,
            "gemini-2.5-flash",
            ModelStatus {
                rate_limited: true,
                ..Default::default()
            },
        );
    }
    {
        let mut record = shared.lock().unwrap();
        record.key_data = serde_json::json!({"access_token": "fresh"});
    }
    engine.record_key_data_updated(&shared);
    engine.record_permanently_failed(&shared);

    let pending = engine.take_pending();
    assert_eq!(pending.len(), 1);
    let (id, update) = &pending[0];
    assert_eq!(*id, 1);
    assert!(update.throttle_data.is_some());
    assert_eq!(
        update.key_data,
        Some(serde_json::json!({"access_token": "fresh"}))
    );
    assert_eq!(update.permanently_failed, Some(true));

    // The buffer is cleared after draining.
    assert!(engine.take_pending().is_empty());
}

#[test]
fn paused_keys_never_surface() {
    let shared_provider = provider(ThrottleMode::ByKey);
    let mut paused = key(1, shared_provider.clone());
    paused.paused = true;
    let engine = engine_with(vec![paused, key(2, shared_provider)]);

    let order: Vec<i64> = engine
        .eligible_keys(candidates(&engine, "gemini-2.5-flash"))
        .map(|(key, _)| key.lock().unwrap().id)
        .collect();
    assert_eq!(order, vec![2]);
}
