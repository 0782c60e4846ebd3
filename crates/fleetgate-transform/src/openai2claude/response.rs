use serde_json::Value as JsonValue;

use fleetgate_protocol::claude::response::{
    Message, MessageResponseRole, MessageType, Usage,
};
use fleetgate_protocol::claude::types::ContentBlock;
use fleetgate_protocol::openai::response::ChatCompletion;

use super::map_finish_reason;

pub fn transform_response(completion: &ChatCompletion) -> Message {
    let choice = completion.choices.first();

    let mut content = Vec::new();
    if let Some(choice) = choice {
        if let Some(reasoning) = &choice.message.reasoning_content
            && !reasoning.is_empty()
        {
            content.push(ContentBlock::Thinking {
                thinking: reasoning.clone(),
                signature: None,
            });
        }
        if let Some(text) = &choice.message.content
            && !text.is_empty()
        {
            content.push(ContentBlock::Text { text: text.clone() });
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for call in tool_calls {
                let input = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(JsonValue::Object(Default::default()));
                content.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input,
                });
            }
        }
    }

    let usage = completion
        .usage
        .as_ref()
        .map(|usage| Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: usage
                .prompt_tokens_details
                .as_ref()
                .and_then(|details| details.cached_tokens),
        })
        .unwrap_or_default();

    Message {
        id: completion.id.clone(),
        r#type: MessageType::Message,
        role: MessageResponseRole::Assistant,
        model: completion.model.clone(),
        content,
        stop_reason: choice
            .and_then(|choice| choice.finish_reason)
            .map(map_finish_reason),
        stop_sequence: None,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::claude::response::StopReason;
    use fleetgate_protocol::openai::response::{
        AssistantRole, ChatChoice, ChatCompletionObject, ResponseMessage,
    };
    use fleetgate_protocol::openai::types::{
        CompletionUsage, FinishReason, FunctionCall, ToolCall, ToolCallType,
    };

    #[test]
    fn choice_becomes_message_blocks() {
        let completion = ChatCompletion {
            id: "chatcmpl-1".to_string(),
            object: ChatCompletionObject::ChatCompletion,
            created: 0,
            model: "gpt-test".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ResponseMessage {
                    role: AssistantRole::Assistant,
                    content: Some("answer".to_string()),
                    reasoning_content: Some("plan".to_string()),
                    tool_calls: Some(vec![ToolCall {
                        id: "call_1".to_string(),
                        r#type: ToolCallType::Function,
                        function: FunctionCall {
                            name: "lookup".to_string(),
                            arguments: "{\"q\":1}".to_string(),
                        },
                    }]),
                },
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: 11,
                completion_tokens: 22,
                total_tokens: 33,
                completion_tokens_details: None,
                prompt_tokens_details: None,
            }),
        };

        let message = transform_response(&completion);
        assert_eq!(message.content.len(), 3);
        assert!(matches!(&message.content[0], ContentBlock::Thinking { thinking, .. } if thinking == "plan"));
        assert!(matches!(&message.content[1], ContentBlock::Text { text } if text == "answer"));
        assert!(matches!(&message.content[2], ContentBlock::ToolUse { name, .. } if name == "lookup"));
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(message.usage.input_tokens, 11);
        assert_eq!(message.usage.output_tokens, 22);
    }
}
