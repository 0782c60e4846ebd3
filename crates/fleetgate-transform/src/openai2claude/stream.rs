use fleetgate_protocol::claude::response::{
    Message, MessageResponseRole, MessageType, StopReason, Usage,
};
use fleetgate_protocol::claude::stream::{
    ContentBlockDelta, MessageDelta, MessageDeltaUsage, MessageStreamEvent,
};
use fleetgate_protocol::claude::types::ContentBlock;
use fleetgate_protocol::openai::stream::{ChatCompletionChunk, ToolCallChunk};
use fleetgate_protocol::openai::types::CompletionUsage;

use super::map_finish_reason;

/// What the single open content block currently is. The messages protocol
/// allows exactly one open block; a kind change closes the old block before
/// the new one starts.
#[derive(Debug, Clone, PartialEq)]
enum OpenBlock {
    Text,
    Thinking,
    Tool { chunk_index: i64 },
}

/// OpenAI chunk stream → Claude message event stream.
///
/// `start` is called before the first upstream chunk so `message_start` can
/// be written (and response headers flushed) without waiting on the upstream.
#[derive(Debug)]
pub struct OpenAiToClaudeStream {
    model: String,
    message_id: String,
    started: bool,
    next_index: u32,
    open: Option<OpenBlock>,
    pending_stop: Option<StopReason>,
    usage: Option<CompletionUsage>,
    finished: bool,
}

impl OpenAiToClaudeStream {
    pub fn new(model: &str, message_id: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            message_id: message_id.into(),
            started: false,
            next_index: 0,
            open: None,
            pending_stop: None,
            usage: None,
            finished: false,
        }
    }

    /// Emit `message_start`. Idempotent.
    pub fn start(&mut self) -> Vec<MessageStreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![MessageStreamEvent::MessageStart {
            message: Message {
                id: self.message_id.clone(),
                r#type: MessageType::Message,
                role: MessageResponseRole::Assistant,
                model: self.model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }]
    }

    pub fn transform_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<MessageStreamEvent> {
        let mut events = self.start();

        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(thinking) = &choice.delta.reasoning_content
                && !thinking.is_empty()
            {
                let index = self.ensure_block(OpenBlock::Thinking, &mut events);
                events.push(MessageStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::ThinkingDelta {
                        thinking: thinking.clone(),
                    },
                });
            }

            if let Some(text) = &choice.delta.content
                && !text.is_empty()
            {
                let index = self.ensure_block(OpenBlock::Text, &mut events);
                events.push(MessageStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::TextDelta { text: text.clone() },
                });
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for call in tool_calls {
                    self.emit_tool_delta(call, &mut events);
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.pending_stop = Some(map_finish_reason(reason));
            }
        }

        // The terminal pair waits for the last usage-bearing chunk when the
        // upstream sends one after the finish_reason chunk.
        if self.pending_stop.is_some() && self.usage.is_some() {
            events.extend(self.finish());
        }

        events
    }

    /// Close anything still open at end of stream.
    pub fn flush(&mut self) -> Vec<MessageStreamEvent> {
        let mut events = self.start();
        if !self.finished {
            if self.pending_stop.is_none() {
                self.pending_stop = Some(StopReason::EndTurn);
            }
            events.extend(self.finish());
        }
        events
    }

    fn finish(&mut self) -> Vec<MessageStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        self.close_open(&mut events);

        let usage = self.usage.take();
        events.push(MessageStreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: self.pending_stop.take(),
                stop_sequence: None,
            },
            usage: MessageDeltaUsage {
                input_tokens: usage.as_ref().map(|usage| usage.prompt_tokens),
                output_tokens: usage.as_ref().map(|usage| usage.completion_tokens),
            },
        });
        events.push(MessageStreamEvent::MessageStop);
        events
    }

    fn ensure_block(&mut self, kind: OpenBlock, events: &mut Vec<MessageStreamEvent>) -> u32 {
        if self.open.as_ref() == Some(&kind) {
            return self.next_index - 1;
        }
        self.close_open(events);

        let index = self.next_index;
        self.next_index += 1;
        let content_block = match &kind {
            OpenBlock::Text => ContentBlock::Text {
                text: String::new(),
            },
            OpenBlock::Thinking => ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            // Tool blocks are opened by emit_tool_delta with their real
            // id/name; this arm never runs.
            OpenBlock::Tool { .. } => ContentBlock::Text {
                text: String::new(),
            },
        };
        self.open = Some(kind);
        events.push(MessageStreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }

    fn emit_tool_delta(&mut self, call: &ToolCallChunk, events: &mut Vec<MessageStreamEvent>) {
        let same_call = matches!(
            self.open,
            Some(OpenBlock::Tool { chunk_index }) if chunk_index == call.index
        );

        let index = if same_call {
            self.next_index - 1
        } else {
            self.close_open(events);
            let index = self.next_index;
            self.next_index += 1;
            self.open = Some(OpenBlock::Tool {
                chunk_index: call.index,
            });
            events.push(MessageStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("toolu_{}", call.index)),
                    name: call
                        .function
                        .as_ref()
                        .and_then(|function| function.name.clone())
                        .unwrap_or_else(|| "tool".to_string()),
                    input: serde_json::Value::Object(Default::default()),
                },
            });
            index
        };

        if let Some(arguments) = call
            .function
            .as_ref()
            .and_then(|function| function.arguments.clone())
            && !arguments.is_empty()
        {
            events.push(MessageStreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::InputJsonDelta {
                    partial_json: arguments,
                },
            });
        }
    }

    fn close_open(&mut self, events: &mut Vec<MessageStreamEvent>) {
        if self.open.take().is_some() {
            events.push(MessageStreamEvent::ContentBlockStop {
                index: self.next_index - 1,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::openai::response::AssistantRole;
    use fleetgate_protocol::openai::stream::{
        ChunkChoice, ChunkDelta, ChunkObject, ToolCallChunkFunction,
    };
    use fleetgate_protocol::openai::types::{FinishReason, ToolCallType};

    fn chunk(delta: ChunkDelta, finish: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: ChunkObject::ChatCompletionChunk,
            created: 0,
            model: "gpt-test".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
        }
    }

    fn text_delta(text: &str) -> ChunkDelta {
        ChunkDelta {
            role: Some(AssistantRole::Assistant),
            content: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn names(events: &[MessageStreamEvent]) -> Vec<&'static str> {
        events.iter().map(|event| event.event_name()).collect()
    }

    #[test]
    fn event_sequence_is_well_formed() {
        let mut state = OpenAiToClaudeStream::new("gpt-test", "msg_1");
        let mut all = state.start();
        all.extend(state.transform_chunk(&chunk(text_delta("hello"), None)));
        all.extend(state.transform_chunk(&chunk(text_delta(" world"), None)));
        all.extend(state.transform_chunk(&chunk(ChunkDelta::default(), Some(FinishReason::Stop))));
        all.extend(state.flush());

        assert_eq!(
            names(&all),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn kind_change_closes_block_first() {
        let mut state = OpenAiToClaudeStream::new("gpt-test", "msg_1");
        let mut all = state.transform_chunk(&chunk(
            ChunkDelta {
                reasoning_content: Some("hmm".to_string()),
                ..Default::default()
            },
            None,
        ));
        all.extend(state.transform_chunk(&chunk(text_delta("answer"), None)));
        all.extend(state.flush());

        assert_eq!(
            names(&all),
            vec![
                "message_start",
                "content_block_start", // thinking
                "content_block_delta",
                "content_block_stop",
                "content_block_start", // text
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        // Indices increase monotonically across blocks.
        let starts: Vec<u32> = all
            .iter()
            .filter_map(|event| match event {
                MessageStreamEvent::ContentBlockStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1]);
    }

    #[test]
    fn tool_arguments_accumulate_as_input_json() {
        let mut state = OpenAiToClaudeStream::new("gpt-test", "msg_1");
        let call = |id: Option<&str>, name: Option<&str>, args: &str| ChunkDelta {
            tool_calls: Some(vec![ToolCallChunk {
                index: 0,
                id: id.map(str::to_string),
                r#type: Some(ToolCallType::Function),
                function: Some(ToolCallChunkFunction {
                    name: name.map(str::to_string),
                    arguments: Some(args.to_string()),
                }),
            }]),
            ..Default::default()
        };

        let mut all = state.transform_chunk(&chunk(call(Some("call_1"), Some("lookup"), "{\"q\""), None));
        all.extend(state.transform_chunk(&chunk(call(None, None, ":1}"), None)));
        all.extend(state.flush());

        let deltas: Vec<&str> = all
            .iter()
            .filter_map(|event| match event {
                MessageStreamEvent::ContentBlockDelta {
                    delta: ContentBlockDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas.join(""), "{\"q\":1}");
    }

    #[test]
    fn usage_after_finish_closes_message() {
        let mut state = OpenAiToClaudeStream::new("gpt-test", "msg_1");
        state.transform_chunk(&chunk(text_delta("x"), None));
        let finish = state.transform_chunk(&chunk(ChunkDelta::default(), Some(FinishReason::Stop)));
        // No usage yet: terminal events held back.
        assert!(!finish.iter().any(|event| event.event_name() == "message_stop"));

        let mut usage_chunk = chunk(ChunkDelta::default(), None);
        usage_chunk.choices.clear();
        usage_chunk.usage = Some(CompletionUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            completion_tokens_details: None,
            prompt_tokens_details: None,
        });
        let tail = state.transform_chunk(&usage_chunk);
        assert_eq!(
            names(&tail),
            vec!["content_block_stop", "message_delta", "message_stop"]
        );
        match &tail[1] {
            MessageStreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
                assert_eq!(usage.output_tokens, Some(2));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // Flush after a finished stream emits nothing further.
        assert!(state.flush().is_empty());
    }
}
