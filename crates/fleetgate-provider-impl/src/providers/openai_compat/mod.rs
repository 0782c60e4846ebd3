//! OpenAI-compatible upstream: raw bearer key plus an optional base URL
//! override, chat-completions wire. OpenAI native, Claude through adapters.

use async_trait::async_trait;

use fleetgate_common::Protocol;
use fleetgate_protocol::claude::request::CreateMessageRequest;
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_protocol::openai::response::ChatCompletion;
use fleetgate_provider_core::{
    AttemptError, Credential, HandlerResponse, ProviderHandler, RequestCtx,
};
use fleetgate_transform::claude2openai;
use fleetgate_transform::openai2claude::{self, OpenAiToClaudeStream};

use crate::providers::{http_client, key_data};
use crate::upstream::{
    ChatStreamKind, SsePipeline, error_snippet, passthrough_stream, pipe_sse, read_body_text,
    record_success, retry_after_ms, send_logged, throttled, upstream_failure,
};

const PROVIDER_NAME: &str = "OPENAI_COMPATIBLE";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const SUPPORTED: &[Protocol] = &[Protocol::OpenAI, Protocol::Claude];

#[derive(Debug, Default)]
pub struct OpenAiCompatHandler;

impl OpenAiCompatHandler {
    pub fn new() -> Self {
        Self
    }

    async fn send_chat(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        model: &str,
        body: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<wreq::Response, AttemptError> {
        let (bearer, base) = {
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
        let url = format!("{base}/v1/chat/completions");
        let client = http_client::shared_client()?;

        let response = send_logged(
            ctx,
            PROVIDER_NAME,
            client
                .post(&url)
                .header("Authorization", format!("Bearer {bearer}"))
                .json(body),
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
        Err(upstream_failure(
            credential,
            model,
            format!("status {}: {}", status.as_u16(), error_snippet(&text)),
        ))
    }
}

#[async_trait]
impl ProviderHandler for OpenAiCompatHandler {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supported_protocols(&self) -> &'static [Protocol] {
        SUPPORTED
    }

    async fn handle_openai(
        &self,
        ctx: &RequestCtx,
        request: &ChatCompletionRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let mut body = request.clone();
        body.model = model.to_string();

        let response = self
            .send_chat(ctx, &credential, model, &body, body.is_stream())
            .await?;
        record_success(&credential, model);

        if body.is_stream() {
            Ok(HandlerResponse::sse(passthrough_stream(response)))
        } else {
            let text = read_body_text(response).await;
            Ok(HandlerResponse::json(200, text.into_bytes()))
        }
    }

    async fn handle_claude(
        &self,
        ctx: &RequestCtx,
        request: &CreateMessageRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let mut body = claude2openai::transform_request(request);
        body.model = model.to_string();

        let response = self
            .send_chat(ctx, &credential, model, &body, request.is_stream())
            .await?;
        record_success(&credential, model);

        if request.is_stream() {
            let kind = ChatStreamKind::OpenAiToClaude {
                state: OpenAiToClaudeStream::new(model, format!("msg_{}", ctx.trace_id)),
            };
            return Ok(HandlerResponse::sse(pipe_sse(
                response,
                SsePipeline::new(kind),
            )));
        }

        let text = read_body_text(response).await;
        let completion: ChatCompletion = serde_json::from_str(&text)
            .map_err(|err| AttemptError::Upstream(format!("bad upstream json: {err}")))?;
        let message = openai2claude::transform_response(&completion);
        let bytes =
            serde_json::to_vec(&message).map_err(|err| AttemptError::Adapter(err.to_string()))?;
        Ok(HandlerResponse::json(200, bytes))
    }
}
