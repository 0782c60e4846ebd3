//! CodeBuddy upstream: opaque access/refresh token pair with a domain hint,
//! OpenAI wire format, a human-readable "reset at" hint inside 429 bodies,
//! and an identity-phrase rewrite on the Claude path to dodge upstream
//! keyword blocking.

use serde::{Deserialize, Serialize};
use serde_json::json;

use async_trait::async_trait;

use fleetgate_common::{Protocol, now_unix_ms};
use fleetgate_protocol::claude::request::CreateMessageRequest;
use fleetgate_protocol::claude::types::{SystemPrompt, TextBlockParam};
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_protocol::openai::response::ChatCompletion;
use fleetgate_provider_core::{
    AttemptError, Credential, HandlerResponse, ProviderHandler, RequestCtx,
};
use fleetgate_transform::openai2claude::{self, OpenAiToClaudeStream};
use fleetgate_transform::claude2openai;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::providers::{http_client, key_data};
use crate::upstream::{
    ChatStreamKind, SsePipeline, error_snippet, passthrough_stream, pipe_sse, read_body_text,
    record_success, retry_after_ms, send_logged, throttled, upstream_failure,
};

const PROVIDER_NAME: &str = "CODEBUDDY";
const DEFAULT_DOMAIN: &str = "www.codebuddy.ai";
const SUPPORTED: &[Protocol] = &[Protocol::OpenAI, Protocol::Claude];

/// Long-lived tokens are refreshed this far ahead of expiry.
const REFRESH_AHEAD_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Claude-Code identity phrases the upstream blocks, with their substitutes.
/// Longer phrases first so the generic fallback never clobbers them.
const SYSTEM_REWRITES: &[(&str, &str)] = &[
    (
        "You are Claude Code, Anthropic's official CLI for Claude.",
        "You are an interactive CLI tool that helps users with software engineering tasks.",
    ),
    (
        "Anthropic's official CLI for Claude",
        "an interactive developer CLI",
    ),
    ("Claude Code", "the assistant"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CodeBuddyCredential {
    access_token: String,
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<String>,
    /// Unix ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default)]
pub struct CodeBuddyHandler;

impl CodeBuddyHandler {
    pub fn new() -> Self {
        Self
    }

    fn parse_credential(credential: &Credential<'_>) -> Result<CodeBuddyCredential, AttemptError> {
        let record = credential.key.lock().expect("key lock");
        let normalized = key_data::normalize(&record.key_data);
        serde_json::from_value(normalized)
            .map_err(|err| AttemptError::InvalidKeyData(format!("codebuddy credential: {err}")))
    }

    fn domain(parsed: &CodeBuddyCredential) -> String {
        parsed
            .domain
            .clone()
            .filter(|domain| !domain.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string())
    }

    async fn ensure_fresh(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        force: bool,
    ) -> Result<CodeBuddyCredential, AttemptError> {
        let parsed = Self::parse_credential(credential)?;
        let imminent = parsed
            .expires_at
            .is_some_and(|expires| expires - now_unix_ms() < REFRESH_AHEAD_MS);
        if !force && !imminent {
            return Ok(parsed);
        }
        self.refresh(ctx, credential, parsed).await
    }

    async fn refresh(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        mut parsed: CodeBuddyCredential,
    ) -> Result<CodeBuddyCredential, AttemptError> {
        let client = http_client::shared_client()?;
        let url = format!(
            "https://{}/v2/plugin/auth/token/refresh",
            Self::domain(&parsed)
        );
        let body = json!({ "refresh_token": parsed.refresh_token });
        let response = send_logged(
            ctx,
            PROVIDER_NAME,
            client
                .post(&url)
                .header("Authorization", format!("Bearer {}", parsed.access_token))
                .json(&body),
            &url,
            None,
            false,
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = read_body_text(response).await;
            // A rejected refresh token never recovers on its own.
            if status.as_u16() == 401 || text.contains("invalid_grant") {
                credential.feedback.record_permanently_failed(credential.key);
                return Err(AttemptError::PermanentKeyFailure(format!(
                    "token refresh rejected: {}",
                    error_snippet(&text)
                )));
            }
            return Err(AttemptError::Upstream(format!(
                "token refresh failed with status {}",
                status.as_u16()
            )));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|err| AttemptError::Upstream(format!("token refresh body: {err}")))?;

        parsed.access_token = refreshed.access_token;
        if let Some(rotated) = refreshed.refresh_token {
            parsed.refresh_token = rotated;
        }
        parsed.expires_at = refreshed.expires_at.or_else(|| {
            refreshed
                .expires_in
                .map(|seconds| now_unix_ms() + seconds * 1000)
        });

        {
            let mut record = credential.key.lock().expect("key lock");
            record.key_data = serde_json::to_value(&parsed)
                .map_err(|err| AttemptError::InvalidKeyData(err.to_string()))?;
        }
        credential.feedback.record_key_data_updated(credential.key);
        Ok(parsed)
    }

    /// Send a chat-completions call, retrying once with a forced refresh on
    /// 401; a second 401 passes through.
    async fn send_chat(
        &self,
        ctx: &RequestCtx,
        credential: &Credential<'_>,
        model: &str,
        body: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<wreq::Response, AttemptError> {
        let client = http_client::shared_client()?;
        let mut parsed = self.ensure_fresh(ctx, credential, false).await?;
        let url = format!("https://{}/v2/chat/completions", Self::domain(&parsed));

        let mut response = send_logged(
            ctx,
            PROVIDER_NAME,
            client
                .post(&url)
                .header("Authorization", format!("Bearer {}", parsed.access_token))
                .json(body),
            &url,
            Some(model),
            stream,
        )
        .await?;

        if response.status().as_u16() == 401 {
            parsed = self.ensure_fresh(ctx, credential, true).await?;
            response = send_logged(
                ctx,
                PROVIDER_NAME,
                client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", parsed.access_token))
                    .json(body),
                &url,
                Some(model),
                stream,
            )
            .await?;
        }
        Ok(response)
    }

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
        let header_reset = retry_after_ms(response.headers());
        let body = read_body_text(response).await;
        if status.as_u16() == 429 {
            // The body's "reset at" stamp is more precise than Retry-After.
            let reset = parse_reset_at(&body).or(header_reset);
            return Err(throttled(credential, model, error_snippet(&body), reset));
        }
        Err(upstream_failure(
            credential,
            model,
            format!("status {}: {}", status.as_u16(), error_snippet(&body)),
        ))
    }
}

#[async_trait]
impl ProviderHandler for CodeBuddyHandler {
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
        let response = self.classify(&credential, model, response).await?;
        let status = response.status().as_u16();
        if status == 401 {
            let text = read_body_text(response).await;
            return Ok(HandlerResponse::json(401, text.into_bytes()));
        }

        record_success(&credential, model);
        if body.is_stream() {
            Ok(HandlerResponse::sse(passthrough_stream(response)))
        } else {
            let text = read_body_text(response).await;
            Ok(HandlerResponse::json(status, text.into_bytes()))
        }
    }

    async fn handle_claude(
        &self,
        ctx: &RequestCtx,
        request: &CreateMessageRequest,
        model: &str,
        credential: Credential<'_>,
    ) -> Result<HandlerResponse, AttemptError> {
        let mut rewritten = request.clone();
        rewritten.system = rewritten.system.map(rewrite_system);

        let mut body = claude2openai::transform_request(&rewritten);
        body.model = model.to_string();

        let response = self
            .send_chat(ctx, &credential, model, &body, request.is_stream())
            .await?;
        let response = self.classify(&credential, model, response).await?;
        if response.status().as_u16() == 401 {
            let text = read_body_text(response).await;
            return Ok(HandlerResponse::json(401, text.into_bytes()));
        }

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

fn rewrite_system(system: SystemPrompt) -> SystemPrompt {
    match system {
        SystemPrompt::Text(text) => SystemPrompt::Text(rewrite_text(text)),
        SystemPrompt::Blocks(blocks) => SystemPrompt::Blocks(
            blocks
                .into_iter()
                .map(|block| TextBlockParam {
                    text: rewrite_text(block.text),
                    ..block
                })
                .collect(),
        ),
    }
}

fn rewrite_text(mut text: String) -> String {
    for (needle, replacement) in SYSTEM_REWRITES {
        if text.contains(needle) {
            text = text.replace(needle, replacement);
        }
    }
    text
}

/// Pull the absolute reset time out of a 429 body shaped like
/// `reset at 2026-08-01T12:30:00Z`. Accepts RFC 3339, a plain
/// `YYYY-MM-DD HH:MM:SS` stamp (read as UTC), or unix seconds.
fn parse_reset_at(body: &str) -> Option<i64> {
    let lowered = body.to_ascii_lowercase();
    let at = lowered.find("reset at ")? + "reset at ".len();
    let rest = &body[at..];
    let stamp: String = rest
        .chars()
        .take_while(|ch| !matches!(ch, '"' | '\'' | ',' | ')' | '\n' | '}'))
        .collect();
    let stamp = stamp.trim().trim_end_matches('.');

    if let Ok(when) = OffsetDateTime::parse(stamp, &Rfc3339) {
        return Some((when.unix_timestamp_nanos() / 1_000_000) as i64);
    }
    let plain = time::format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
        .ok()?;
    if let Ok(when) = time::PrimitiveDateTime::parse(stamp, &plain) {
        return Some(when.assume_utc().unix_timestamp() * 1000);
    }
    stamp.parse::<i64>().ok().map(|seconds| seconds * 1000)
}
