use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use fleetgate_common::Protocol;
use fleetgate_protocol::claude::request::CreateMessageRequest;
use fleetgate_protocol::gemini::request::GenerateContentRequest;
use fleetgate_protocol::openai::request::ChatCompletionRequest;

use crate::errors::AttemptError;
use crate::key::{KeyRecord, SharedKey};
use crate::throttle::ThrottleEngine;

/// Request-scoped context passed to every handler call.
#[derive(Debug, Clone, Default)]
pub struct RequestCtx {
    pub trace_id: String,
}

/// The key being attempted plus the feedback channel to the throttle engine.
/// Handlers report through `feedback` and never persist anything themselves.
#[derive(Clone, Copy)]
pub struct Credential<'a> {
    pub key: &'a SharedKey,
    pub feedback: &'a ThrottleEngine,
}

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

pub enum HandlerBody {
    Bytes(Bytes),
    Stream(BodyStream),
}

/// A downstream-ready response in the protocol the caller spoke.
pub struct HandlerResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: HandlerBody,
}

impl std::fmt::Debug for HandlerResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HandlerResponse {
    pub fn json(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: HandlerBody::Bytes(Bytes::from(body)),
        }
    }

    pub fn sse(stream: BodyStream) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("content-type".to_string(), "text/event-stream".to_string()),
                ("cache-control".to_string(), "no-cache".to_string()),
            ],
            body: HandlerBody::Stream(stream),
        }
    }
}

/// The contract every upstream plugs into. Implementations are stateless;
/// per-key state travels in the credential, per-request state in the context.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// The inbound protocols this upstream can serve, natively or through
    /// adapters. Authoritative: the router never routes a protocol that is
    /// not declared here.
    fn supported_protocols(&self) -> &'static [Protocol];

    /// Synchronous per-key plan/tier eligibility for a resolved base id.
    /// Must not block or perform I/O.
    fn can_access_model(&self, key: &KeyRecord, base_id: &str) -> bool {
        let _ = (key, base_id);
        true
    }

    async fn handle_openai(
        &self,
        ctx: &RequestCtx,
        request: &ChatCompletionRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let _ = (ctx, request, model, credential);
        Err(AttemptError::Adapter(format!(
            "{} does not serve the openai protocol",
            self.name()
        )))
    }

    async fn handle_gemini(
        &self,
        ctx: &RequestCtx,
        request: &GenerateContentRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let _ = (ctx, request, model, credential);
        Err(AttemptError::Adapter(format!(
            "{} does not serve the gemini protocol",
            self.name()
        )))
    }

    async fn handle_claude(
        &self,
        ctx: &RequestCtx,
        request: &CreateMessageRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let _ = (ctx, request, model, credential);
        Err(AttemptError::Adapter(format!(
            "{} does not serve the claude protocol",
            self.name()
        )))
    }
}
