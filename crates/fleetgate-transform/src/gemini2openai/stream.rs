use fleetgate_protocol::gemini::response::GenerateContentResponse;
use fleetgate_protocol::gemini::types::Part;
use fleetgate_protocol::openai::response::AssistantRole;
use fleetgate_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkObject, ToolCallChunk, ToolCallChunkFunction,
};
use fleetgate_protocol::openai::types::{CompletionUsage, FinishReason, ToolCallType};

use super::{map_finish_reason, map_usage};

/// Streaming counterpart of [`super::transform_response`]. Every emitted
/// chunk shares one `id`; usage is accumulated across upstream chunks and, if
/// the caller asked for `stream_options.include_usage`, flushed as a final
/// empty-choices chunk.
#[derive(Debug)]
pub struct GeminiToOpenAiStream {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
    role_sent: bool,
    next_tool_index: i64,
    usage: Option<CompletionUsage>,
}

impl GeminiToOpenAiStream {
    pub fn new(model: &str, created: i64, include_usage: bool) -> Self {
        Self {
            id: format!("chatcmpl-{created}"),
            model: model.to_string(),
            created,
            include_usage,
            role_sent: false,
            next_tool_index: 0,
            usage: None,
        }
    }

    pub fn transform_chunk(
        &mut self,
        response: &GenerateContentResponse,
    ) -> Vec<ChatCompletionChunk> {
        if let Some(id) = &response.response_id
            && self.id != *id
            && !self.role_sent
        {
            self.id = id.clone();
        }
        if let Some(model) = &response.model_version {
            self.model = model.clone();
        }
        if let Some(usage) = &response.usage_metadata {
            self.usage = Some(map_usage(usage));
        }

        let mut chunks = Vec::new();
        for (idx, candidate) in response.candidates.iter().enumerate() {
            let index = candidate.index.unwrap_or(idx as i64);
            for part in &candidate.content.parts {
                if let Some(chunk) = self.chunk_for_part(index, part) {
                    chunks.push(chunk);
                }
            }
            if let Some(reason) = candidate.finish_reason {
                chunks.push(self.make_chunk(
                    index,
                    ChunkDelta::default(),
                    Some(map_finish_reason(reason)),
                ));
            }
        }
        chunks
    }

    /// Trailing usage chunk, produced at most once when the upstream ends.
    pub fn flush(&mut self) -> Option<ChatCompletionChunk> {
        if !self.include_usage {
            return None;
        }
        let usage = self.usage.take()?;
        Some(ChatCompletionChunk {
            id: self.id.clone(),
            object: ChunkObject::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: Vec::new(),
            usage: Some(usage),
        })
    }

    fn chunk_for_part(&mut self, index: i64, part: &Part) -> Option<ChatCompletionChunk> {
        if let Some(text) = &part.text {
            if text.is_empty() {
                return None;
            }
            let delta = if part.thought == Some(true) {
                ChunkDelta {
                    reasoning_content: Some(text.clone()),
                    ..ChunkDelta::default()
                }
            } else {
                ChunkDelta {
                    content: Some(text.clone()),
                    ..ChunkDelta::default()
                }
            };
            return Some(self.make_chunk(index, delta, None));
        }

        if let Some(call) = &part.function_call {
            let tool_index = self.next_tool_index;
            self.next_tool_index += 1;
            let arguments = call
                .args
                .as_ref()
                .and_then(|args| serde_json::to_string(args).ok())
                .unwrap_or_else(|| "{}".to_string());
            let delta = ChunkDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index: tool_index,
                    id: Some(
                        call.id
                            .clone()
                            .unwrap_or_else(|| format!("call_{tool_index}")),
                    ),
                    r#type: Some(ToolCallType::Function),
                    function: Some(ToolCallChunkFunction {
                        name: Some(call.name.clone()),
                        arguments: Some(arguments),
                    }),
                }]),
                ..ChunkDelta::default()
            };
            return Some(self.make_chunk(index, delta, None));
        }

        None
    }

    fn make_chunk(
        &mut self,
        index: i64,
        mut delta: ChunkDelta,
        finish_reason: Option<FinishReason>,
    ) -> ChatCompletionChunk {
        if !self.role_sent {
            self.role_sent = true;
            delta.role = Some(AssistantRole::Assistant);
        }
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChunkObject::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::gemini::response::{Candidate, UsageMetadata};
    use fleetgate_protocol::gemini::types::{Content, FinishReason as GeminiFinishReason};

    fn text_chunk(text: &str, finish: Option<GeminiFinishReason>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: None,
                    parts: vec![Part::text(text)],
                },
                finish_reason: finish,
                index: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn id_is_stable_across_chunks() {
        let mut state = GeminiToOpenAiStream::new("gemini-2.5-flash", 7, false);
        let first = state.transform_chunk(&text_chunk("a", None));
        let second = state.transform_chunk(&text_chunk("b", Some(GeminiFinishReason::Stop)));
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].choices[0].delta.role, Some(AssistantRole::Assistant));
        assert_eq!(second[0].choices[0].delta.role, None);
        assert_eq!(
            second[1].choices[0].finish_reason,
            Some(FinishReason::Stop)
        );
    }

    #[test]
    fn usage_accumulates_and_flushes_once() {
        let mut state = GeminiToOpenAiStream::new("gemini-2.5-flash", 7, true);
        let mut chunk = text_chunk("a", None);
        chunk.usage_metadata = Some(UsageMetadata {
            prompt_token_count: Some(3),
            candidates_token_count: Some(1),
            ..Default::default()
        });
        state.transform_chunk(&chunk);

        let mut last = text_chunk("b", Some(GeminiFinishReason::Stop));
        last.usage_metadata = Some(UsageMetadata {
            prompt_token_count: Some(3),
            candidates_token_count: Some(4),
            ..Default::default()
        });
        state.transform_chunk(&last);

        let usage_chunk = state.flush().unwrap();
        assert!(usage_chunk.choices.is_empty());
        let usage = usage_chunk.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 7);
        assert!(state.flush().is_none());
    }

    #[test]
    fn no_usage_chunk_unless_requested() {
        let mut state = GeminiToOpenAiStream::new("m", 7, false);
        let mut chunk = text_chunk("a", Some(GeminiFinishReason::Stop));
        chunk.usage_metadata = Some(UsageMetadata::default());
        state.transform_chunk(&chunk);
        assert!(state.flush().is_none());
    }
}
