//! Shared upstream plumbing: request dispatch with structured logging,
//! outcome classification feeding the throttle engine, and the SSE pipelines
//! that adapt upstream streams to the caller's protocol.

use std::io;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use futures_util::StreamExt;
use http::HeaderMap;
use http::header::RETRY_AFTER;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use fleetgate_protocol::claude::stream::MessageStreamEvent;
use fleetgate_protocol::gemini::response::GenerateContentResponse;
use fleetgate_protocol::openai::stream::ChatCompletionChunk;
use fleetgate_protocol::sse::{SseEvent, SseParser};
use fleetgate_provider_core::handler::BodyStream;
use fleetgate_provider_core::{AttemptError, Credential, ModelStatus, RequestCtx};
use fleetgate_transform::codeassist;
use fleetgate_transform::gemini2openai::GeminiToOpenAiStream;
use fleetgate_transform::openai2claude::OpenAiToClaudeStream;

/// Wait this long for the upstream's first stream chunk before emitting a
/// keep-alive so slow upstreams do not starve the client of headers.
const FIRST_CHUNK_WAIT: Duration = Duration::from_secs(5);

/// Send a fully-built request with structured request/response logging.
/// The builder carries its own body (json or form).
pub(crate) async fn send_logged(
    ctx: &RequestCtx,
    provider: &str,
    builder: wreq::RequestBuilder,
    url: &str,
    model: Option<&str>,
    is_stream: bool,
) -> Result<wreq::Response, AttemptError> {
    let started = Instant::now();
    match model {
        Some(model) => info!(
            event = "upstream_request",
            trace_id = %ctx.trace_id,
            provider = %provider,
            url = %url,
            model = %model,
            is_stream = is_stream
        ),
        None => info!(
            event = "upstream_request",
            trace_id = %ctx.trace_id,
            provider = %provider,
            url = %url,
            is_stream = is_stream
        ),
    }

    let response = builder.send().await.map_err(|err| {
        warn!(
            event = "upstream_response",
            trace_id = %ctx.trace_id,
            provider = %provider,
            status = "error",
            elapsed_ms = started.elapsed().as_millis() as u64,
            error = %err
        );
        AttemptError::Upstream(err.to_string())
    })?;

    info!(
        event = "upstream_response",
        trace_id = %ctx.trace_id,
        provider = %provider,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        is_stream = is_stream
    );
    Ok(response)
}

/// Absolute unix-ms reset time from a `Retry-After` header, numeric seconds
/// or HTTP-date form.
pub(crate) fn retry_after_ms(headers: &HeaderMap) -> Option<i64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return Some(fleetgate_common::now_unix_ms() + seconds.max(0) * 1000);
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|since| since.as_millis() as i64)
}

/// Report a 429 and produce the tagged error. `reset_at_ms` is whatever the
/// handler could extract (body hints win over the Retry-After header).
pub(crate) fn throttled(
    credential: &Credential<'_>,
    base_id: &str,
    message: String,
    reset_at_ms: Option<i64>,
) -> AttemptError {
    credential.feedback.record_model_status(
        credential.key,
        base_id,
        ModelStatus {
            success: false,
            rate_limited: true,
            last_error: Some(message.clone()),
            reset_at_ms,
        },
    );
    AttemptError::Throttled {
        message,
        reset_at_ms,
    }
}

/// Report a transient upstream failure and produce the error.
pub(crate) fn upstream_failure(
    credential: &Credential<'_>,
    base_id: &str,
    message: String,
) -> AttemptError {
    credential.feedback.record_model_status(
        credential.key,
        base_id,
        ModelStatus {
            success: false,
            rate_limited: false,
            last_error: Some(message.clone()),
            reset_at_ms: None,
        },
    );
    AttemptError::Upstream(message)
}

pub(crate) fn record_success(credential: &Credential<'_>, base_id: &str) {
    credential.feedback.record_model_status(
        credential.key,
        base_id,
        ModelStatus {
            success: true,
            rate_limited: false,
            last_error: None,
            reset_at_ms: None,
        },
    );
}

pub(crate) async fn read_body_text(response: wreq::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => format!("(unreadable body: {err})"),
    }
}

pub(crate) async fn read_json(response: wreq::Response) -> Result<JsonValue, AttemptError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| AttemptError::Upstream(err.to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| AttemptError::Upstream(format!("bad upstream json: {err}")))
}

pub(crate) fn error_snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 300 {
        trimmed.to_string()
    } else {
        let mut end = 300;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

/// The downstream shape an upstream SSE stream is adapted into.
pub(crate) enum ChatStreamKind {
    /// Gemini caller on a Gemini upstream; optionally strips the Code-Assist
    /// `{response: ...}` envelope.
    GeminiPassthrough { unwrap: bool },
    /// OpenAI caller on a Gemini upstream.
    GeminiToOpenAi {
        unwrap: bool,
        state: GeminiToOpenAiStream,
    },
    /// Claude caller on a Gemini upstream: chained through the OpenAI shape.
    GeminiToClaude {
        unwrap: bool,
        gemini: GeminiToOpenAiStream,
        claude: OpenAiToClaudeStream,
    },
    /// Claude caller on an OpenAI-speaking upstream.
    OpenAiToClaude { state: OpenAiToClaudeStream },
}

pub(crate) struct SsePipeline {
    kind: ChatStreamKind,
    done_sent: bool,
}

impl SsePipeline {
    pub(crate) fn new(kind: ChatStreamKind) -> Self {
        Self {
            kind,
            done_sent: false,
        }
    }

    /// Frames to write before the first upstream chunk. Claude streams open
    /// with `message_start` so headers flush immediately.
    fn preamble(&mut self) -> Vec<Bytes> {
        match &mut self.kind {
            ChatStreamKind::GeminiToClaude { claude, .. }
            | ChatStreamKind::OpenAiToClaude { state: claude } => {
                claude.start().iter().map(named_frame).collect()
            }
            _ => Vec::new(),
        }
    }

    fn keepalive_frame(&self) -> Bytes {
        match &self.kind {
            ChatStreamKind::GeminiToClaude { .. } | ChatStreamKind::OpenAiToClaude { .. } => {
                named_frame(&MessageStreamEvent::Ping)
            }
            _ => Bytes::from_static(b": keep-alive\n\n"),
        }
    }

    fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes> {
        if event.data.is_empty() {
            return Vec::new();
        }
        if event.data == "[DONE]" {
            return match self.kind {
                ChatStreamKind::GeminiToOpenAi { .. } => self.done(),
                _ => Vec::new(),
            };
        }

        match &mut self.kind {
            ChatStreamKind::GeminiPassthrough { unwrap } => {
                let data = if *unwrap {
                    codeassist::unwrap_data_line(&event.data)
                } else {
                    event.data.clone()
                };
                vec![raw_data_frame(&data)]
            }
            ChatStreamKind::GeminiToOpenAi { unwrap, state } => {
                let Some(response) = parse_gemini(&event.data, *unwrap) else {
                    return Vec::new();
                };
                state
                    .transform_chunk(&response)
                    .iter()
                    .map(data_frame)
                    .collect()
            }
            ChatStreamKind::GeminiToClaude {
                unwrap,
                gemini,
                claude,
            } => {
                let Some(response) = parse_gemini(&event.data, *unwrap) else {
                    return Vec::new();
                };
                let mut frames = Vec::new();
                for chunk in gemini.transform_chunk(&response) {
                    frames.extend(claude.transform_chunk(&chunk).iter().map(named_frame));
                }
                frames
            }
            ChatStreamKind::OpenAiToClaude { state } => {
                let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                    return Vec::new();
                };
                state.transform_chunk(&chunk).iter().map(named_frame).collect()
            }
        }
    }

    fn finish(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        match &mut self.kind {
            ChatStreamKind::GeminiPassthrough { .. } => {}
            ChatStreamKind::GeminiToOpenAi { state, .. } => {
                if let Some(usage_chunk) = state.flush() {
                    frames.push(data_frame(&usage_chunk));
                }
            }
            ChatStreamKind::GeminiToClaude { gemini, claude, .. } => {
                if let Some(usage_chunk) = gemini.flush() {
                    frames.extend(claude.transform_chunk(&usage_chunk).iter().map(named_frame));
                }
                frames.extend(claude.flush().iter().map(named_frame));
            }
            ChatStreamKind::OpenAiToClaude { state } => {
                frames.extend(state.flush().iter().map(named_frame));
            }
        }
        if matches!(self.kind, ChatStreamKind::GeminiToOpenAi { .. }) {
            frames.extend(self.done());
        }
        frames
    }

    fn done(&mut self) -> Vec<Bytes> {
        if self.done_sent {
            return Vec::new();
        }
        self.done_sent = true;
        vec![Bytes::from_static(b"data: [DONE]\n\n")]
    }
}

fn parse_gemini(data: &str, unwrap: bool) -> Option<GenerateContentResponse> {
    let data = if unwrap {
        codeassist::unwrap_data_line(data)
    } else {
        data.to_string()
    };
    serde_json::from_str(&data).ok()
}

fn data_frame<T: Serialize>(value: &T) -> Bytes {
    match serde_json::to_string(value) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(_) => Bytes::new(),
    }
}

fn raw_data_frame(data: &str) -> Bytes {
    Bytes::from(format!("data: {data}\n\n"))
}

fn named_frame(event: &MessageStreamEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => Bytes::from(format!("event: {}\ndata: {json}\n\n", event.event_name())),
        Err(_) => Bytes::new(),
    }
}

/// Pipe an upstream SSE response through a pipeline into a bounded-channel
/// body stream. Client back-pressure propagates: the reader task suspends on
/// the full channel, which suspends the upstream socket reads.
pub(crate) fn pipe_sse(response: wreq::Response, mut pipeline: SsePipeline) -> BodyStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, io::Error>>(16);

    tokio::spawn(async move {
        for frame in pipeline.preamble() {
            if tx.send(Ok(frame)).await.is_err() {
                return;
            }
        }

        let mut parser = SseParser::new();
        let mut upstream = response.bytes_stream();
        let mut first = true;

        loop {
            let item = if first {
                match tokio::time::timeout(FIRST_CHUNK_WAIT, upstream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        if tx.send(Ok(pipeline.keepalive_frame())).await.is_err() {
                            return;
                        }
                        first = false;
                        continue;
                    }
                }
            } else {
                upstream.next().await
            };
            first = false;

            match item {
                Some(Ok(chunk)) => {
                    for event in parser.push_bytes(&chunk) {
                        for frame in pipeline.on_event(&event) {
                            if tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
                    return;
                }
                None => break,
            }
        }

        for event in parser.finish() {
            for frame in pipeline.on_event(&event) {
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        }
        for frame in pipeline.finish() {
            if tx.send(Ok(frame)).await.is_err() {
                return;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Raw byte passthrough for upstreams already speaking the caller's stream
/// format.
pub(crate) fn passthrough_stream(response: wreq::Response) -> BodyStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|item| item.map_err(|err| io::Error::other(err.to_string()))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn done_is_emitted_exactly_once() {
        let mut pipeline = SsePipeline::new(ChatStreamKind::GeminiToOpenAi {
            unwrap: false,
            state: GeminiToOpenAiStream::new("m", 1, false),
        });
        let first = pipeline.on_event(&data_event("[DONE]"));
        assert_eq!(first.len(), 1);
        assert!(pipeline.on_event(&data_event("[DONE]")).is_empty());
        // finish() does not repeat the terminator either.
        assert!(pipeline.finish().is_empty());
    }

    #[test]
    fn finish_appends_done_when_upstream_omits_it() {
        let mut pipeline = SsePipeline::new(ChatStreamKind::GeminiToOpenAi {
            unwrap: false,
            state: GeminiToOpenAiStream::new("m", 1, false),
        });
        let frames = pipeline.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"data: [DONE]\n\n");
    }

    #[test]
    fn gemini_passthrough_unwraps_envelope() {
        let mut pipeline = SsePipeline::new(ChatStreamKind::GeminiPassthrough { unwrap: true });
        let frames = pipeline.on_event(&data_event(r#"{"response":{"candidates":[]}}"#));
        assert_eq!(&frames[0][..], b"data: {\"candidates\":[]}\n\n");
    }

    #[test]
    fn claude_pipeline_opens_with_message_start() {
        let mut pipeline = SsePipeline::new(ChatStreamKind::OpenAiToClaude {
            state: OpenAiToClaudeStream::new("m", "msg_1"),
        });
        let frames = pipeline.preamble();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with(b"event: message_start\n"));
    }
}
