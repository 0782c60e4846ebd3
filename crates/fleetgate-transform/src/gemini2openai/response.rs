use fleetgate_protocol::gemini::response::GenerateContentResponse;
use fleetgate_protocol::gemini::types::Part;
use fleetgate_protocol::openai::response::{
    AssistantRole, ChatChoice, ChatCompletion, ChatCompletionObject, ResponseMessage,
};
use fleetgate_protocol::openai::types::{FunctionCall, ToolCall, ToolCallType};

use super::{map_finish_reason, map_usage};

pub fn transform_response(
    response: &GenerateContentResponse,
    model: &str,
    created: i64,
) -> ChatCompletion {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(idx, candidate)| {
            let index = candidate.index.unwrap_or(idx as i64);
            let (content, tool_calls) = collect_parts(&candidate.content.parts, index);
            ChatChoice {
                index,
                message: ResponseMessage {
                    role: AssistantRole::Assistant,
                    content,
                    reasoning_content: None,
                    tool_calls,
                },
                finish_reason: candidate.finish_reason.map(map_finish_reason),
            }
        })
        .collect();

    ChatCompletion {
        id: response
            .response_id
            .clone()
            .unwrap_or_else(|| format!("chatcmpl-{created}")),
        object: ChatCompletionObject::ChatCompletion,
        created,
        model: response
            .model_version
            .clone()
            .unwrap_or_else(|| model.to_string()),
        choices,
        usage: response.usage_metadata.as_ref().map(map_usage),
    }
}

fn collect_parts(parts: &[Part], choice_index: i64) -> (Option<String>, Option<Vec<ToolCall>>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        if let Some(part_text) = &part.text {
            if part.thought == Some(true) {
                text.push_str("<thinking>");
                text.push_str(part_text);
                text.push_str("</thinking>");
            } else {
                text.push_str(part_text);
            }
        }
        if let Some(call) = &part.function_call {
            let arguments = call
                .args
                .as_ref()
                .and_then(|args| serde_json::to_string(args).ok())
                .unwrap_or_else(|| "{}".to_string());
            let id = call
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{}_{}", choice_index, tool_calls.len()));
            tool_calls.push(ToolCall {
                id,
                r#type: ToolCallType::Function,
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments,
                },
            });
        }
    }

    (
        if text.is_empty() { None } else { Some(text) },
        if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    )
}
