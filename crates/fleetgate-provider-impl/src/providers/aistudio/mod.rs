//! Google AI Studio upstream: raw API key via `x-goog-api-key` against the
//! public `v1beta` generateContent endpoints. Gemini native, OpenAI through
//! the adapters.

use serde_json::Value as JsonValue;

use async_trait::async_trait;

use fleetgate_common::{Protocol, now_unix_secs};
use fleetgate_protocol::gemini::request::GenerateContentRequest;
use fleetgate_protocol::gemini::response::GenerateContentResponse;
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_provider_core::{
    AttemptError, Credential, HandlerResponse, ProviderHandler, RequestCtx,
};
use fleetgate_transform::gemini2openai::{self, GeminiToOpenAiStream};
use fleetgate_transform::openai2gemini;

use crate::providers::{http_client, key_data};
use crate::upstream::{
    ChatStreamKind, SsePipeline, error_snippet, pipe_sse, read_body_text, read_json,
    record_success, retry_after_ms, send_logged, throttled, upstream_failure,
};

const PROVIDER_NAME: &str = "GOOGLE_AI_STUDIO";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const SUPPORTED: &[Protocol] = &[Protocol::OpenAI, Protocol::Gemini];

#[derive(Debug, Default)]
pub struct AiStudioHandler;

impl AiStudioHandler {
    pub fn new() -> Self {
        Self
    }

    async fn send_generate(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        model: &str,
        body: &JsonValue,
        stream: bool,
    ) -> Result<wreq::Response, AttemptError> {
        let (api_key, base) = {
            let record = credential.key.lock().expect("key lock");
            (
                key_data::api_key(&record.key_data)?,
                record
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
            )
        };
        let method = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        let url = format!("{base}/v1beta/models/{model}:{method}");
        let client = http_client::shared_client()?;

        let response = send_logged(
            ctx,
            PROVIDER_NAME,
            client.post(&url).header("x-goog-api-key", api_key).json(body),
            &url,
            Some(model),
            stream,
        )
        .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reset = retry_after_ms(response.headers());
        let text = read_body_text(response).await;
        if status.as_u16() == 429 {
            return Err(throttled(credential, model, error_snippet(&text), reset));
        }
        // Raw keys have no refresh path; 401/403 count as ordinary failures.
        Err(upstream_failure(
            credential,
            model,
            format!("status {}: {}", status.as_u16(), error_snippet(&text)),
        ))
    }
}

#[async_trait]
impl ProviderHandler for AiStudioHandler {
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
        let response = self
            .send_generate(ctx, &credential, model, &body, request.stream)
            .await?;
        record_success(&credential, model);

        if request.stream {
            return Ok(HandlerResponse::sse(pipe_sse(
                response,
                SsePipeline::new(ChatStreamKind::GeminiPassthrough { unwrap: false }),
            )));
        }
        let text = read_body_text(response).await;
        Ok(HandlerResponse::json(200, text.into_bytes()))
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
        let response = self
            .send_generate(ctx, &credential, model, &body, request.is_stream())
            .await?;
        record_success(&credential, model);

        if request.is_stream() {
            let state =
                GeminiToOpenAiStream::new(model, now_unix_secs(), request.wants_stream_usage());
            return Ok(HandlerResponse::sse(pipe_sse(
                response,
                SsePipeline::new(ChatStreamKind::GeminiToOpenAi {
                    unwrap: false,
                    state,
                }),
            )));
        }

        let parsed: GenerateContentResponse = serde_json::from_value(read_json(response).await?)
            .map_err(|err| AttemptError::Upstream(format!("bad gemini body: {err}")))?;
        let completion = gemini2openai::transform_response(&parsed, model, now_unix_secs());
        let bytes = serde_json::to_vec(&completion)
            .map_err(|err| AttemptError::Adapter(err.to_string()))?;
        Ok(HandlerResponse::json(200, bytes))
    }
}
