use std::sync::Arc;

use tracing::warn;

use fleetgate_protocol::claude::request::CreateMessageRequest;
use fleetgate_protocol::gemini::request::GenerateContentRequest;
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_provider_core::{
    Credential, HandlerRegistry, HandlerResponse, ModelQuery, RequestCtx, SharedKey,
    ThrottleEngine, User, split_fallbacks,
};
use fleetgate_storage::CredentialStore;

use crate::error::GatewayError;

/// A front-door request in whichever protocol the caller spoke. The response
/// comes back in the same protocol.
pub enum InboundRequest {
    OpenAI(ChatCompletionRequest),
    Gemini(GenerateContentRequest),
    Claude(CreateMessageRequest),
}

impl InboundRequest {
    fn protocol(&self) -> fleetgate_common::Protocol {
        match self {
            InboundRequest::OpenAI(_) => fleetgate_common::Protocol::OpenAI,
            InboundRequest::Gemini(_) => fleetgate_common::Protocol::Gemini,
            InboundRequest::Claude(_) => fleetgate_common::Protocol::Claude,
        }
    }

    fn model_field(&self) -> &str {
        match self {
            InboundRequest::OpenAI(request) => &request.model,
            InboundRequest::Gemini(request) => &request.model,
            InboundRequest::Claude(request) => &request.model,
        }
    }
}

pub struct GatewayEngine {
    store: Arc<dyn CredentialStore>,
    registry: Arc<HandlerRegistry>,
}

impl GatewayEngine {
    pub fn new(store: Arc<dyn CredentialStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Run the routing pipeline: alias substitution, fallback walk, key
    /// selection, sequential attempts, aggregate, commit.
    pub async fn dispatch(
        &self,
        ctx: &RequestCtx,
        user: &User,
        inbound: InboundRequest,
    ) -> Result<HandlerResponse, GatewayError> {
        let protocol = inbound.protocol();
        let resolved = user.resolve_model_alias(inbound.model_field()).to_string();
        let fallbacks = split_fallbacks(&resolved);
        if fallbacks.is_empty() {
            return Err(GatewayError::BadRequest("missing model".to_string()));
        }

        let throttle = ThrottleEngine::new(user.keys.clone());
        let mut details: Vec<String> = Vec::new();
        let mut attempted = false;
        let mut any_throttled = false;

        for entry in &fallbacks {
            let query = ModelQuery::parse(entry);
            let candidates = self.candidates(&throttle, &query, protocol);
            let eligible = throttle.eligible_keys(candidates);
            if eligible.is_empty() {
                details.push(format!("{entry}: no keys available"));
                continue;
            }

            for (key, base_id) in eligible {
                attempted = true;
                let (key_id, provider_name) = {
                    let record = key.lock().expect("key lock");
                    (record.id, record.provider.name.clone())
                };
                let Some(handler) = self.registry.get(&provider_name) else {
                    continue;
                };
                let credential = Credential {
                    key: &key,
                    feedback: &throttle,
                };

                let outcome = match &inbound {
                    InboundRequest::OpenAI(request) => {
                        handler.handle_openai(ctx, request, &base_id, credential).await
                    }
                    InboundRequest::Gemini(request) => {
                        handler.handle_gemini(ctx, request, &base_id, credential).await
                    }
                    InboundRequest::Claude(request) => {
                        handler.handle_claude(ctx, request, &base_id, credential).await
                    }
                };

                match outcome {
                    Ok(response) => {
                        self.commit(&throttle).await;
                        return Ok(response);
                    }
                    Err(error) => {
                        any_throttled = any_throttled || error.is_throttled();
                        warn!(
                            event = "attempt_failed",
                            trace_id = %ctx.trace_id,
                            provider = %provider_name,
                            key_id = key_id,
                            model = %base_id,
                            error = %error
                        );
                        details.push(format!("{entry} (key {key_id}): {error}"));
                    }
                }
            }
        }

        self.commit(&throttle).await;

        if !attempted {
            return Err(GatewayError::NoEligibleKeys { details });
        }
        Err(GatewayError::Exhausted {
            throttled: any_throttled,
            details,
        })
    }

    /// Keys that can serve this fallback entry at all: provider filter,
    /// registered handler, declared protocol support, model-table match and
    /// the handler's per-key eligibility predicate. Throttle state is the
    /// iterator's concern.
    fn candidates(
        &self,
        throttle: &ThrottleEngine,
        query: &ModelQuery,
        protocol: fleetgate_common::Protocol,
    ) -> Vec<(SharedKey, String)> {
        let mut out = Vec::new();
        for key in throttle.keys() {
            let resolved = {
                let record = key.lock().expect("key lock");
                if record.paused || record.permanently_failed {
                    continue;
                }
                let Some(handler) = self.registry.get(&record.provider.name) else {
                    continue;
                };
                if !handler.supported_protocols().contains(&protocol) {
                    continue;
                }
                let Some(base_id) = record.resolve_model(query) else {
                    continue;
                };
                if !handler.can_access_model(&record, &base_id) {
                    continue;
                }
                base_id
            };
            out.push((key.clone(), resolved));
        }
        out
    }

    /// Flush buffered throttle/key mutations: one store write per touched
    /// key. Runs unconditionally after the attempt loop; a failed write is
    /// logged, never surfaced to the client.
    async fn commit(&self, throttle: &ThrottleEngine) {
        for (key_id, update) in throttle.take_pending() {
            if let Err(error) = self.store.update_key(key_id, update).await {
                warn!(event = "commit_failed", key_id = key_id, error = %error);
            }
        }
    }
}
