//! Gemini-Code-Assist upstream: Google OAuth installed-app credential with a
//! companion project id, `v1internal` endpoints that wrap every payload as
//! `{model, project, request}` / `{response: ...}`, and adapter chains that let
//! all three inbound protocols reach it.

use serde_json::{Value as JsonValue, json};

use async_trait::async_trait;

use fleetgate_common::{Protocol, now_unix_secs};
use fleetgate_protocol::claude::request::CreateMessageRequest;
use fleetgate_protocol::gemini::request::GenerateContentRequest;
use fleetgate_protocol::gemini::response::GenerateContentResponse;
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_provider_core::{
    AttemptError, Credential, HandlerResponse, ProviderHandler, RequestCtx,
};
use fleetgate_transform::gemini2openai::{self, GeminiToOpenAiStream};
use fleetgate_transform::openai2claude::{self, OpenAiToClaudeStream};
use fleetgate_transform::{claude2openai, codeassist, openai2gemini};

use crate::providers::http_client;
use crate::upstream::{
    ChatStreamKind, SsePipeline, pipe_sse, read_body_text, read_json, record_success,
    retry_after_ms, send_logged, throttled, upstream_failure,
};

mod oauth;

pub(crate) const PROVIDER_NAME: &str = "GEMINI_CODE_ASSIST";
const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";
const SUPPORTED: &[Protocol] = &[Protocol::OpenAI, Protocol::Gemini, Protocol::Claude];

#[derive(Debug, Default)]
pub struct GeminiCodeAssistHandler;

impl GeminiCodeAssistHandler {
    pub fn new() -> Self {
        Self
    }

    fn base_url(credential: &Credential<'_>) -> String {
        let record = credential.key.lock().expect("key lock");
        record
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Send a wrapped generate call, retrying once with a forced token
    /// refresh on 401. A second 401 is returned as-is to the caller.
    async fn send_generate(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        model: &str,
        request_body: &JsonValue,
        stream: bool,
    ) -> Result<wreq::Response, AttemptError> {
        let base = Self::base_url(credential);
        let path = if stream {
            "v1internal:streamGenerateContent?alt=sse"
        } else {
            "v1internal:generateContent"
        };
        let url = format!("{base}/{path}");
        let client = http_client::shared_client()?;

        let mut token = oauth::ensure_fresh(ctx, credential, false).await?;
        let project = oauth::project_id(&token)?.to_string();
        let wrapped = json!({
            "model": model,
            "project": project,
            "request": request_body,
        });

        let mut response = send_logged(
            ctx,
            PROVIDER_NAME,
            client
                .post(&url)
                .header("Authorization", format!("Bearer {}", token.access_token))
                .header("Accept", if stream { "text/event-stream" } else { "application/json" })
                .json(&wrapped),
            &url,
            Some(model),
            stream,
        )
        .await?;

        if response.status().as_u16() == 401 {
            token = oauth::ensure_fresh(ctx, credential, true).await?;
            response = send_logged(
                ctx,
                PROVIDER_NAME,
                client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", token.access_token))
                    .header("Accept", if stream { "text/event-stream" } else { "application/json" })
                    .json(&wrapped),
                &url,
                Some(model),
                stream,
            )
            .await?;
        }

        Ok(response)
    }

    /// Shared non-2xx classification; `Ok(response)` means 2xx or a
    /// passthrough-worthy 401.
    async fn classify(
        &self,
        credential: &Credential<'_>,
        model: &str,
        response: wreq::Response,
    ) -> Result<wreq::Response, AttemptError> {
        let status = response.status();
        if status.is_success() || status.as_u16() == 401 {
            return Ok(response);
        }
        let reset = retry_after_ms(response.headers());
        let body = read_body_text(response).await;
        let snippet = crate::upstream::error_snippet(&body);
        if status.as_u16() == 429 {
            return Err(throttled(credential, model, snippet, reset));
        }
        Err(upstream_failure(
            credential,
            model,
            format!("status {}: {snippet}", status.as_u16()),
        ))
    }

    async fn fetch_gemini_response(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        model: &str,
        body: &JsonValue,
    ) -> Result<Result<GenerateContentResponse, HandlerResponse>, AttemptError> {
        let response = self
            .send_generate(ctx, credential, model, body, false)
            .await?;
        let response = self.classify(credential, model, response).await?;
        if response.status().as_u16() == 401 {
            let body = read_body_text(response).await;
            return Ok(Err(HandlerResponse::json(401, body.into_bytes())));
        }
        let unwrapped = codeassist::unwrap_body(read_json(response).await?);
        let parsed: GenerateContentResponse = serde_json::from_value(unwrapped)
            .map_err(|err| AttemptError::Upstream(format!("bad code-assist body: {err}")))?;
        record_success(credential, model);
        Ok(Ok(parsed))
    }

    async fn fetch_gemini_stream(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        model: &str,
        body: &JsonValue,
        kind: ChatStreamKind,
    ) -> Result<HandlerResponse, AttemptError> {
        let response = self
            .send_generate(ctx, credential, model, body, true)
            .await?;
        let response = self.classify(credential, model, response).await?;
        if response.status().as_u16() == 401 {
            let body = read_body_text(response).await;
            return Ok(HandlerResponse::json(401, body.into_bytes()));
        }
        record_success(credential, model);
        Ok(HandlerResponse::sse(pipe_sse(
            response,
            SsePipeline::new(kind),
        )))
    }
}

#[async_trait]
impl ProviderHandler for GeminiCodeAssistHandler {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supported_protocols(&self) -> &'static [Protocol] {
        SUPPORTED
    }

    async fn handle_gemini(
        &self,
        ctx: &RequestCtx,
        request: &GenerateContentRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let body = serde_json::to_value(&request.body)
            .map_err(|err| AttemptError::Adapter(err.to_string()))?;
        if request.stream {
            return self
                .fetch_gemini_stream(
                    ctx,
                    &credential,
                    model,
                    &body,
                    ChatStreamKind::GeminiPassthrough { unwrap: true },
                )
                .await;
        }
        match self
            .fetch_gemini_response(ctx, &credential, model, &body)
            .await?
        {
            Ok(parsed) => {
                let bytes = serde_json::to_vec(&parsed)
                    .map_err(|err| AttemptError::Adapter(err.to_string()))?;
                Ok(HandlerResponse::json(200, bytes))
            }
            Err(passthrough) => Ok(passthrough),
        }
    }

    async fn handle_openai(
        &self,
        ctx: &RequestCtx,
        request: &ChatCompletionRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let gemini_body = openai2gemini::transform_request(request);
        let body = serde_json::to_value(&gemini_body)
            .map_err(|err| AttemptError::Adapter(err.to_string()))?;

        if request.is_stream() {
            let state =
                GeminiToOpenAiStream::new(model, now_unix_secs(), request.wants_stream_usage());
            return self
                .fetch_gemini_stream(
                    ctx,
                    &credential,
                    model,
                    &body,
                    ChatStreamKind::GeminiToOpenAi {
                        unwrap: true,
                        state,
                    },
                )
                .await;
        }

        match self
            .fetch_gemini_response(ctx, &credential, model, &body)
            .await?
        {
            Ok(parsed) => {
                let completion =
                    gemini2openai::transform_response(&parsed, model, now_unix_secs());
                let bytes = serde_json::to_vec(&completion)
                    .map_err(|err| AttemptError::Adapter(err.to_string()))?;
                Ok(HandlerResponse::json(200, bytes))
            }
            Err(passthrough) => Ok(passthrough),
        }
    }

    async fn handle_claude(
        &self,
        ctx: &RequestCtx,
        request: &CreateMessageRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        // No direct Claude↔Gemini adapter: chain through the OpenAI shape.
        let openai_request = claude2openai::transform_request(request);
        let gemini_body = openai2gemini::transform_request(&openai_request);
        let body = serde_json::to_value(&gemini_body)
            .map_err(|err| AttemptError::Adapter(err.to_string()))?;

        if request.is_stream() {
            let kind = ChatStreamKind::GeminiToClaude {
                unwrap: true,
                gemini: GeminiToOpenAiStream::new(model, now_unix_secs(), true),
                claude: OpenAiToClaudeStream::new(model, format!("msg_{}", ctx.trace_id)),
            };
            return self
                .fetch_gemini_stream(ctx, &credential, model, &body, kind)
                .await;
        }

        match self
            .fetch_gemini_response(ctx, &credential, model, &body)
            .await?
        {
            Ok(parsed) => {
                let completion =
                    gemini2openai::transform_response(&parsed, model, now_unix_secs());
                let message = openai2claude::transform_response(&completion);
                let bytes = serde_json::to_vec(&message)
                    .map_err(|err| AttemptError::Adapter(err.to_string()))?;
                Ok(HandlerResponse::json(200, bytes))
            }
            Err(passthrough) => Ok(passthrough),
        }
    }
}
