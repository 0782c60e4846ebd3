//! Claude messages request → OpenAI chat-completions request.

use serde_json::json;

use fleetgate_protocol::claude::request::{CreateMessageRequest, ThinkingParam};
use fleetgate_protocol::claude::types::{
    ContentBlockParam, DocumentSource, ImageSource, MessageContent, MessageRole, SystemPrompt,
    ToolChoiceParam, ToolParam, ToolResultContent,
};
use fleetgate_protocol::openai::request::{ChatCompletionRequest, StreamOptions};
use fleetgate_protocol::openai::types::{
    ChatContent, ChatMessage, ContentPart, FilePart, FunctionCall, FunctionObject, ImageUrl,
    NamedFunction, ReasoningEffort, Stop, ToolCall, ToolCallType, ToolChoice, ToolChoiceMode,
    ToolDefinition,
};

pub fn transform_request(request: &CreateMessageRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = match system {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(_) => system.joined_text(),
        };
        if !text.is_empty() {
            messages.push(ChatMessage::System {
                content: ChatContent::Text(text),
                name: None,
            });
        }
    }

    for message in &request.messages {
        messages.extend(map_message(message.role, &message.content));
    }

    let (tool_choice, parallel_override) = map_tool_choice(request.tool_choice.as_ref());

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        temperature: request.temperature,
        top_p: request.top_p,
        n: None,
        stop: request
            .stop_sequences
            .clone()
            .filter(|sequences| !sequences.is_empty())
            .map(Stop::Many),
        max_tokens: Some(request.max_tokens),
        max_completion_tokens: None,
        frequency_penalty: None,
        presence_penalty: None,
        seed: None,
        logprobs: None,
        top_logprobs: None,
        reasoning_effort: map_thinking(request.thinking.as_ref()),
        response_format: None,
        tools: map_tools(request.tools.as_deref()),
        tool_choice,
        parallel_tool_calls: parallel_override,
        stream: request.stream,
        stream_options: if request.is_stream() {
            Some(StreamOptions {
                include_usage: Some(true),
            })
        } else {
            None
        },
        user: request
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.user_id.clone()),
    }
}

fn map_message(role: MessageRole, content: &MessageContent) -> Vec<ChatMessage> {
    let blocks = match content {
        MessageContent::Text(text) => {
            return vec![plain_message(role, text.clone())];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut out = Vec::new();
    let mut parts: Vec<ContentPart> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlockParam::Text { text } => parts.push(ContentPart::Text {
                text: text.clone(),
            }),
            // Prior-turn thinking survives as plain assistant text.
            ContentBlockParam::Thinking { thinking, .. } => parts.push(ContentPart::Text {
                text: thinking.clone(),
            }),
            ContentBlockParam::Image { source } => parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_source_url(source),
                    detail: None,
                },
            }),
            ContentBlockParam::Document { source } => {
                if let Some(part) = map_document(source) {
                    parts.push(part);
                }
            }
            ContentBlockParam::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    r#type: ToolCallType::Function,
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            ContentBlockParam::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                // Tool results must land as their own `tool` messages; flush
                // whatever user content has accumulated first.
                flush_parts(role, &mut parts, &mut tool_calls, &mut out);
                out.push(ChatMessage::Tool {
                    content: ChatContent::Text(tool_result_text(content.as_ref())),
                    tool_call_id: tool_use_id.clone(),
                });
            }
        }
    }

    flush_parts(role, &mut parts, &mut tool_calls, &mut out);
    out
}

fn flush_parts(
    role: MessageRole,
    parts: &mut Vec<ContentPart>,
    tool_calls: &mut Vec<ToolCall>,
    out: &mut Vec<ChatMessage>,
) {
    if parts.is_empty() && tool_calls.is_empty() {
        return;
    }
    let parts = std::mem::take(parts);
    let tool_calls = std::mem::take(tool_calls);
    match role {
        MessageRole::User => out.push(ChatMessage::User {
            content: ChatContent::Parts(parts),
            name: None,
        }),
        MessageRole::Assistant => {
            let text = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            out.push(ChatMessage::Assistant {
                content: if text.is_empty() {
                    None
                } else {
                    Some(ChatContent::Text(text))
                },
                reasoning_content: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            });
        }
    }
}

fn plain_message(role: MessageRole, text: String) -> ChatMessage {
    match role {
        MessageRole::User => ChatMessage::User {
            content: ChatContent::Text(text),
            name: None,
        },
        MessageRole::Assistant => ChatMessage::Assistant {
            content: Some(ChatContent::Text(text)),
            reasoning_content: None,
            tool_calls: None,
        },
    }
}

fn image_source_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
        ImageSource::Url { url } => url.clone(),
    }
}

fn map_document(source: &DocumentSource) -> Option<ContentPart> {
    match source {
        DocumentSource::Base64 { data, .. } => Some(ContentPart::File {
            file: FilePart {
                file_data: Some(data.clone()),
                file_id: None,
                filename: Some("document.pdf".to_string()),
            },
        }),
        DocumentSource::Text { data, .. } => Some(ContentPart::Text { text: data.clone() }),
        DocumentSource::Url { url } => Some(ContentPart::Text { text: url.clone() }),
    }
}

fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlockParam::Text { text } => Some(text.clone()),
                other => serde_json::to_string(other).ok(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn map_tool_choice(
    choice: Option<&ToolChoiceParam>,
) -> (Option<ToolChoice>, Option<bool>) {
    let Some(choice) = choice else {
        return (None, None);
    };
    let parallel = |disable: &Option<bool>| {
        if *disable == Some(true) {
            Some(false)
        } else {
            None
        }
    };
    match choice {
        ToolChoiceParam::Auto {
            disable_parallel_tool_use,
        } => (
            Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
            parallel(disable_parallel_tool_use),
        ),
        ToolChoiceParam::Any {
            disable_parallel_tool_use,
        } => (
            Some(ToolChoice::Mode(ToolChoiceMode::Required)),
            parallel(disable_parallel_tool_use),
        ),
        ToolChoiceParam::Tool {
            name,
            disable_parallel_tool_use,
        } => (
            Some(ToolChoice::Named {
                r#type: ToolCallType::Function,
                function: NamedFunction { name: name.clone() },
            }),
            parallel(disable_parallel_tool_use),
        ),
        ToolChoiceParam::None => (Some(ToolChoice::Mode(ToolChoiceMode::None)), None),
    }
}

fn map_tools(tools: Option<&[ToolParam]>) -> Option<Vec<ToolDefinition>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| ToolDefinition {
                r#type: ToolCallType::Function,
                function: match tool.r#type.as_deref() {
                    Some(kind) if kind.starts_with("bash_") => bash_tool(&tool.name),
                    Some(kind) if kind.starts_with("text_editor_") => text_editor_tool(&tool.name),
                    Some(kind) if kind.starts_with("web_search_") => web_search_tool(&tool.name),
                    _ => FunctionObject {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                        strict: None,
                    },
                },
            })
            .collect(),
    )
}

fn bash_tool(name: &str) -> FunctionObject {
    FunctionObject {
        name: name.to_string(),
        description: Some(
            "Run a shell command in a persistent bash session and return its output.".to_string(),
        ),
        parameters: Some(json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to run." },
                "restart": { "type": "boolean", "description": "Restart the session instead of running a command." }
            },
            "required": ["command"]
        })),
        strict: None,
    }
}

fn text_editor_tool(name: &str) -> FunctionObject {
    FunctionObject {
        name: name.to_string(),
        description: Some(
            "View, create and edit files with view/create/str_replace/insert commands.".to_string(),
        ),
        parameters: Some(json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "enum": ["view", "create", "str_replace", "insert"] },
                "path": { "type": "string" },
                "file_text": { "type": "string" },
                "old_str": { "type": "string" },
                "new_str": { "type": "string" },
                "insert_line": { "type": "integer" },
                "view_range": { "type": "array", "items": { "type": "integer" } }
            },
            "required": ["command", "path"]
        })),
        strict: None,
    }
}

fn web_search_tool(name: &str) -> FunctionObject {
    FunctionObject {
        name: name.to_string(),
        description: Some("Search the web and return result snippets.".to_string()),
        parameters: Some(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query." }
            },
            "required": ["query"]
        })),
        strict: None,
    }
}

fn map_thinking(thinking: Option<&ThinkingParam>) -> Option<ReasoningEffort> {
    match thinking? {
        ThinkingParam::Disabled => None,
        ThinkingParam::Enabled { budget_tokens } => Some(match budget_tokens {
            ..=256 => ReasoningEffort::Minimal,
            257..=512 => ReasoningEffort::Low,
            513..=2048 => ReasoningEffort::Medium,
            _ => ReasoningEffort::High,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::claude::types::MessageParam;
    use serde_json::Value as JsonValue;

    fn to_value<T: serde::Serialize>(value: &T) -> JsonValue {
        serde_json::to_value(value).unwrap_or(JsonValue::Null)
    }

    fn base_request() -> CreateMessageRequest {
        CreateMessageRequest {
            model: "claude-test".to_string(),
            messages: vec![MessageParam {
                role: MessageRole::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            max_tokens: 128,
            system: None,
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            metadata: None,
            tools: None,
            tool_choice: None,
            thinking: None,
        }
    }

    #[test]
    fn system_string_becomes_system_message() {
        let mut request = base_request();
        request.system = Some(SystemPrompt::Text("be terse".to_string()));
        let out = transform_request(&request);
        assert!(matches!(
            &out.messages[0],
            ChatMessage::System { content: ChatContent::Text(text), .. } if text == "be terse"
        ));
    }

    #[test]
    fn tool_use_and_result_round_trip() {
        let mut request = base_request();
        request.messages = vec![
            MessageParam {
                role: MessageRole::Assistant,
                content: MessageContent::Blocks(vec![ContentBlockParam::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "lookup".to_string(),
                    input: json!({"q": "rust"}),
                }]),
            },
            MessageParam {
                role: MessageRole::User,
                content: MessageContent::Blocks(vec![ContentBlockParam::ToolResult {
                    tool_use_id: "toolu_1".to_string(),
                    content: Some(ToolResultContent::Text("found".to_string())),
                    is_error: None,
                }]),
            },
        ];

        let out = transform_request(&request);
        match &out.messages[0] {
            ChatMessage::Assistant { tool_calls, .. } => {
                let calls = tool_calls.as_ref().unwrap();
                assert_eq!(calls[0].id, "toolu_1");
                assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match &out.messages[1] {
            ChatMessage::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "toolu_1"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn builtin_tools_become_described_functions() {
        let mut request = base_request();
        request.tools = Some(vec![
            ToolParam {
                r#type: Some("bash_20250124".to_string()),
                name: "bash".to_string(),
                description: None,
                input_schema: None,
                max_uses: None,
            },
            ToolParam {
                r#type: Some("web_search_20250305".to_string()),
                name: "web_search".to_string(),
                description: None,
                input_schema: None,
                max_uses: None,
            },
        ]);

        let out = transform_request(&request);
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].function.name, "bash");
        let params = to_value(&tools[0].function.parameters);
        assert_eq!(params["required"][0], "command");
        assert_eq!(tools[1].function.name, "web_search");
    }

    #[test]
    fn thinking_budget_buckets() {
        for (budget, expected) in [
            (100, ReasoningEffort::Minimal),
            (256, ReasoningEffort::Minimal),
            (512, ReasoningEffort::Low),
            (2048, ReasoningEffort::Medium),
            (8192, ReasoningEffort::High),
        ] {
            let mut request = base_request();
            request.thinking = Some(ThinkingParam::Enabled {
                budget_tokens: budget,
            });
            assert_eq!(
                transform_request(&request).reasoning_effort,
                Some(expected),
                "budget {budget}"
            );
        }
    }

    #[test]
    fn disable_parallel_tool_use_carries() {
        let mut request = base_request();
        request.tool_choice = Some(ToolChoiceParam::Auto {
            disable_parallel_tool_use: Some(true),
        });
        let out = transform_request(&request);
        assert_eq!(out.parallel_tool_calls, Some(false));
        assert!(matches!(
            out.tool_choice,
            Some(ToolChoice::Mode(ToolChoiceMode::Auto))
        ));
    }
}
