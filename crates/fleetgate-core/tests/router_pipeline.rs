use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use fleetgate_common::{Protocol, now_unix_ms};
use fleetgate_core::{GatewayEngine, InboundRequest};
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_protocol::openai::types::{ChatContent, ChatMessage};
use fleetgate_provider_core::{
    AccessToken, AttemptError, Credential, HandlerRegistry, HandlerResponse, KeyRecord, KeyUpdate,
    ModelSpec, ModelStatus, ProviderConfig, ProviderHandler, RequestCtx, ThrottleBucket,
    ThrottleData, ThrottleMode, User,
};
use fleetgate_storage::{CredentialStore, ProviderSeed, StorageResult};

const PROVIDER: &str = "GEMINI_CODE_ASSIST";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Plan {
    Succeed,
    Throttle,
    PermanentFail,
    Fail,
}

/// Scripted handler: the outcome per key id, and a log of (key id, resolved
/// base) attempts.
struct ScriptedHandler {
    plans: HashMap<i64, Plan>,
    calls: Mutex<Vec<(i64, String)>>,
}

impl ScriptedHandler {
    fn new(plans: HashMap<i64, Plan>) -> Arc<Self> {
        Arc::new(Self {
            plans,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(i64, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn run(&self, model: &str, credential: Credential<'_>) -> Result<HandlerResponse, AttemptError> {
        let key_id = credential.key.lock().unwrap().id;
        self.calls.lock().unwrap().push((key_id, model.to_string()));
        match self.plans.get(&key_id).copied().unwrap_or(Plan::Succeed) {
            Plan::Succeed => {
                credential.feedback.record_model_status(
                    credential.key,
                    model,
                    ModelStatus {
                        success: true,
                        ..Default::default()
                    },
                );
                Ok(HandlerResponse::json(200, b"{}".to_vec()))
            }
            Plan::Throttle => {
                credential.feedback.record_model_status(
                    credential.key,
                    model,
                    ModelStatus {
                        rate_limited: true,
                        last_error: Some("quota".to_string()),
                        ..Default::default()
                    },
                );
                Err(AttemptError::Throttled {
                    message: "quota".to_string(),
                    reset_at_ms: None,
                })
            }
            Plan::PermanentFail => {
                credential.feedback.record_permanently_failed(credential.key);
                Err(AttemptError::PermanentKeyFailure("invalid_grant".to_string()))
            }
            Plan::Fail => {
                credential.feedback.record_model_status(
                    credential.key,
                    model,
                    ModelStatus {
                        last_error: Some("boom".to_string()),
                        ..Default::default()
                    },
                );
                Err(AttemptError::Upstream("boom".to_string()))
            }
        }
    }
}

#[async_trait]
impl ProviderHandler for ScriptedHandler {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supported_protocols(&self) -> &'static [Protocol] {
        &[Protocol::OpenAI, Protocol::Gemini, Protocol::Claude]
    }

    async fn handle_openai(
        &self,
        _ctx: &RequestCtx,
        _request: &ChatCompletionRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        self.run(model, credential)
    }
}

/// In-memory store that records key mutations.
#[derive(Default)]
struct RecordingStore {
    updates: Mutex<Vec<(i64, KeyUpdate)>>,
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
    async fn find_user_by_token(&self, _token: &str) -> StorageResult<Option<User>> {
        Ok(None)
    }
    async fn find_access_token(&self, _token: &str) -> StorageResult<Option<AccessToken>> {
        Ok(None)
    }
    async fn find_user_by_id(&self, _user_id: i64) -> StorageResult<Option<User>> {
        Ok(None)
    }
    async fn update_key(&self, key_id: i64, update: KeyUpdate) -> StorageResult<()> {
        self.updates.lock().unwrap().push((key_id, update));
        Ok(())
    }
    async fn ensure_provider(&self, _seed: &ProviderSeed) -> StorageResult<()> {
        Ok(())
    }
}

fn provider_config(models: &[&str]) -> Arc<ProviderConfig> {
    Arc::new(ProviderConfig {
        id: 1,
        name: PROVIDER.to_string(),
        display_name: "Gemini Code Assist".to_string(),
        throttle_mode: ThrottleMode::ByKey,
        min_throttle_minutes: 1,
        max_throttle_minutes: 15,
        models: models.iter().map(|spec| ModelSpec::parse(spec)).collect(),
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

fn user(keys: Vec<KeyRecord>, aliases: &[(&str, &str)]) -> User {
    User {
        id: 1,
        token: "sk-user".to_string(),
        name: None,
        model_aliases: aliases
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect(),
        keys,
    }
}

fn openai_request(model: &str) -> InboundRequest {
    InboundRequest::OpenAI(ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::User {
            content: ChatContent::Text("hi".to_string()),
            name: None,
        }],
        temperature: None,
        top_p: None,
        n: None,
        stop: None,
        max_tokens: None,
        max_completion_tokens: None,
        frequency_penalty: None,
        presence_penalty: None,
        seed: None,
        logprobs: None,
        top_logprobs: None,
        reasoning_effort: None,
        response_format: None,
        tools: None,
        tool_choice: None,
        parallel_tool_calls: None,
        stream: None,
        stream_options: None,
        user: None,
    })
}

fn engine_with(
    handler: Arc<ScriptedHandler>,
    store: Arc<RecordingStore>,
) -> GatewayEngine {
    let mut registry = HandlerRegistry::new();
    registry.register(handler);
    GatewayEngine::new(store, Arc::new(registry))
}

fn ctx() -> RequestCtx {
    RequestCtx {
        trace_id: "test-trace".to_string(),
    }
}

#[tokio::test]
async fn fallback_skips_unlisted_model_and_throttled_key() {
    // S1: K1 throttled for 30s, K2 healthy; pro is not in the provider's
    // model list, flash is. The second fallback entry wins on K2.
    let provider = provider_config(&["gemini-2.5-flash"]);
    let mut k1 = key(1, provider.clone());
    k1.throttle.0.insert(
        "_global_".to_string(),
        ThrottleBucket {
            expiration: now_unix_ms() + 30_000,
            current_backoff_duration: 60_000,
            consecutive_failures: 0,
            last_error: None,
        },
    );
    let k2 = key(2, provider);

    let handler = ScriptedHandler::new(HashMap::new());
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler.clone(), store.clone());
    let user = user(vec![k1, k2], &[]);

    let response = engine
        .dispatch(&ctx(), &user, openai_request("gemini-2.5-pro,gemini-2.5-flash"))
        .await
        .expect("routing should succeed");
    assert_eq!(response.status, 200);
    assert_eq!(handler.calls(), vec![(2, "gemini-2.5-flash".to_string())]);
    // Healthy-bucket success stages nothing: no store writes at all.
    assert!(store.updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn user_alias_expands_before_parsing() {
    // S2: the alias maps to a provider-prefixed two-entry fallback list.
    let provider = provider_config(&["gemini-2.5-pro", "gemini-2.5-flash"]);
    let handler = ScriptedHandler::new(HashMap::new());
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler.clone(), store);
    let user = user(
        vec![key(1, provider)],
        &[("gpt-4", "GEMINI_CODE_ASSIST/gemini-2.5-pro,gemini-2.5-flash")],
    );

    engine
        .dispatch(&ctx(), &user, openai_request("gpt-4"))
        .await
        .expect("routing should succeed");
    assert_eq!(handler.calls(), vec![(1, "gemini-2.5-pro".to_string())]);
}

#[tokio::test]
async fn permanent_failure_falls_through_and_persists() {
    // S4: key 1 dies with invalid_grant, key 2 serves; the sticky flag is
    // committed.
    let provider = provider_config(&["gemini-2.5-flash"]);
    let handler = ScriptedHandler::new(HashMap::from([(1, Plan::PermanentFail)]));
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler.clone(), store.clone());
    let user = user(vec![key(1, provider.clone()), key(2, provider)], &[]);

    let response = engine
        .dispatch(&ctx(), &user, openai_request("gemini-2.5-flash"))
        .await
        .expect("second key should serve");
    assert_eq!(response.status, 200);
    assert_eq!(
        handler.calls(),
        vec![
            (1, "gemini-2.5-flash".to_string()),
            (2, "gemini-2.5-flash".to_string()),
        ]
    );

    let updates = store.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, 1);
    assert_eq!(updates[0].1.permanently_failed, Some(true));
}

#[tokio::test]
async fn alias_as_identifier_resolves_base_id() {
    // S6: request "fast" routes as the configured base id.
    let provider = provider_config(&["gemini-2.5-flash$fast"]);
    let handler = ScriptedHandler::new(HashMap::new());
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler.clone(), store);
    let user = user(vec![key(1, provider)], &[]);

    engine
        .dispatch(&ctx(), &user, openai_request("fast"))
        .await
        .expect("routing should succeed");
    assert_eq!(handler.calls(), vec![(1, "gemini-2.5-flash".to_string())]);
}

#[tokio::test]
async fn all_throttled_attempts_aggregate_to_429() {
    let provider = provider_config(&["gemini-2.5-flash"]);
    let handler =
        ScriptedHandler::new(HashMap::from([(1, Plan::Throttle), (2, Plan::Throttle)]));
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler.clone(), store.clone());
    let user = user(vec![key(1, provider.clone()), key(2, provider)], &[]);

    let error = engine
        .dispatch(&ctx(), &user, openai_request("gemini-2.5-flash"))
        .await
        .expect_err("all attempts throttle");
    assert_eq!(error.status(), 429);
    let envelope = error.envelope();
    assert_eq!(envelope.details.unwrap().len(), 2);
    // Both throttle buckets were committed, one write per key.
    let updates = store.updates.lock().unwrap();
    assert_eq!(updates.len(), 2);
}

#[tokio::test]
async fn mixed_failures_without_throttle_are_500() {
    let provider = provider_config(&["gemini-2.5-flash"]);
    let handler = ScriptedHandler::new(HashMap::from([(1, Plan::Fail)]));
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler, store);
    let user = user(vec![key(1, provider)], &[]);

    let error = engine
        .dispatch(&ctx(), &user, openai_request("gemini-2.5-flash"))
        .await
        .expect_err("attempt fails");
    assert_eq!(error.status(), 500);
}

#[tokio::test]
async fn no_matching_key_is_no_keys_available() {
    let provider = provider_config(&["gemini-2.5-flash"]);
    let handler = ScriptedHandler::new(HashMap::new());
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler, store);
    let user1 = user(vec![key(1, provider)], &[]);

    let error = engine
        .dispatch(&ctx(), &user1, openai_request("unlisted-model"))
        .await
        .expect_err("nothing can serve this");
    assert_eq!(error.status(), 500);
    assert_eq!(error.envelope().error, "no keys available");

    // A provider prefix that matches no key behaves the same way.
    let provider = provider_config(&["gemini-2.5-flash"]);
    let handler = ScriptedHandler::new(HashMap::new());
    let store = Arc::new(RecordingStore::default());
    let engine = engine_with(handler, store);
    let user2 = user(vec![key(1, provider)], &[]);
    let error = engine
        .dispatch(&ctx(), &user2, openai_request("OTHER_PROVIDER/gemini-2.5-flash"))
        .await
        .expect_err("provider filter excludes the key");
    assert_eq!(error.envelope().error, "no keys available");
}
