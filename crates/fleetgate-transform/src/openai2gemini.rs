//! OpenAI chat-completions request → Gemini generateContent request.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use fleetgate_protocol::gemini::request::GenerateContentBody;
use fleetgate_protocol::gemini::types::{
    Blob, Content, ContentRole, FileData, FunctionCall, FunctionCallingConfig, FunctionCallingMode,
    FunctionDeclaration, FunctionResponse, GenerationConfig, Part, ThinkingConfig, Tool, ToolConfig,
};
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_protocol::openai::types::{
    ChatContent, ChatMessage, ContentPart, ReasoningEffort, ResponseFormat, ToolChoice,
    ToolChoiceMode, ToolDefinition,
};

pub fn transform_request(request: &ChatCompletionRequest) -> GenerateContentBody {
    let mut system_texts: Vec<String> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    // tool_call id -> function name, so tool results can be answered by name.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in &request.messages {
        match message {
            ChatMessage::System { content, .. } | ChatMessage::Developer { content, .. } => {
                let text = content.joined_text();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            ChatMessage::User { content, .. } => {
                let parts = map_content_parts(content);
                if !parts.is_empty() {
                    push_merged(&mut contents, ContentRole::User, parts);
                }
            }
            ChatMessage::Assistant {
                content,
                reasoning_content,
                tool_calls,
            } => {
                let mut parts = Vec::new();
                if let Some(reasoning) = reasoning_content
                    && !reasoning.is_empty()
                {
                    parts.push(Part {
                        text: Some(reasoning.clone()),
                        thought: Some(true),
                        ..Part::default()
                    });
                }
                if let Some(content) = content {
                    parts.extend(map_content_parts(content));
                }
                if let Some(calls) = tool_calls {
                    for call in calls {
                        call_names.insert(call.id.clone(), call.function.name.clone());
                        let args = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(JsonValue::String(call.function.arguments.clone()));
                        parts.push(Part {
                            function_call: Some(FunctionCall {
                                id: Some(call.id.clone()),
                                name: call.function.name.clone(),
                                args: Some(args),
                            }),
                            ..Part::default()
                        });
                    }
                }
                if !parts.is_empty() {
                    push_merged(&mut contents, ContentRole::Model, parts);
                }
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                let name = call_names
                    .get(tool_call_id)
                    .cloned()
                    .unwrap_or_else(|| tool_call_id.clone());
                let text = content.joined_text();
                let response = serde_json::from_str(&text)
                    .unwrap_or_else(|_| serde_json::json!({ "result": text }));
                let part = Part {
                    function_response: Some(FunctionResponse {
                        id: Some(tool_call_id.clone()),
                        name,
                        response,
                    }),
                    ..Part::default()
                };
                push_merged(&mut contents, ContentRole::User, vec![part]);
            }
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: vec![Part::text(system_texts.join("\n"))],
        })
    };

    GenerateContentBody {
        contents,
        system_instruction,
        tools: map_tools(request.tools.as_deref()),
        tool_config: map_tool_choice(request.tool_choice.as_ref()),
        safety_settings: None,
        generation_config: map_generation_config(request),
    }
}

/// Append parts, merging into the previous content when the role repeats.
fn push_merged(contents: &mut Vec<Content>, role: ContentRole, parts: Vec<Part>) {
    if let Some(last) = contents.last_mut()
        && last.role == Some(role)
    {
        last.parts.extend(parts);
        return;
    }
    contents.push(Content {
        role: Some(role),
        parts,
    });
}

fn map_content_parts(content: &ChatContent) -> Vec<Part> {
    match content {
        ChatContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![Part::text(text.clone())]
            }
        }
        ChatContent::Parts(parts) => parts.iter().filter_map(map_part).collect(),
    }
}

fn map_part(part: &ContentPart) -> Option<Part> {
    match part {
        ContentPart::Text { text } => {
            if text.is_empty() {
                None
            } else {
                Some(Part::text(text.clone()))
            }
        }
        ContentPart::ImageUrl { image_url } => Some(map_image_url(&image_url.url)),
        ContentPart::InputAudio { input_audio } => Some(Part {
            inline_data: Some(Blob {
                mime_type: format!("audio/{}", input_audio.format),
                data: input_audio.data.clone(),
            }),
            ..Part::default()
        }),
        ContentPart::File { file } => {
            let data = file.file_data.as_ref()?;
            Some(Part {
                inline_data: Some(Blob {
                    mime_type: guess_file_mime(file.filename.as_deref()).to_string(),
                    data: data.clone(),
                }),
                ..Part::default()
            })
        }
    }
}

/// `data:` URLs become inline blobs; anything else is a file reference.
fn map_image_url(url: &str) -> Part {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((mime, data)) = rest.split_once(";base64,")
    {
        return Part {
            inline_data: Some(Blob {
                mime_type: mime.to_string(),
                data: data.to_string(),
            }),
            ..Part::default()
        };
    }
    Part {
        file_data: Some(FileData {
            mime_type: None,
            file_uri: url.to_string(),
        }),
        ..Part::default()
    }
}

fn guess_file_mime(filename: Option<&str>) -> &'static str {
    match filename.and_then(|name| name.rsplit_once('.')).map(|x| x.1) {
        Some("pdf") => "application/pdf",
        Some("txt") | Some("md") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn map_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<Tool>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    let declarations = tools
        .iter()
        .map(|tool| FunctionDeclaration {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: tool.function.parameters.clone(),
        })
        .collect();
    Some(vec![Tool {
        function_declarations: Some(declarations),
    }])
}

fn map_tool_choice(choice: Option<&ToolChoice>) -> Option<ToolConfig> {
    let config = match choice? {
        ToolChoice::Mode(ToolChoiceMode::None) => FunctionCallingConfig {
            mode: FunctionCallingMode::None,
            allowed_function_names: None,
        },
        ToolChoice::Mode(ToolChoiceMode::Auto) => FunctionCallingConfig {
            mode: FunctionCallingMode::Auto,
            allowed_function_names: None,
        },
        ToolChoice::Mode(ToolChoiceMode::Required) => FunctionCallingConfig {
            mode: FunctionCallingMode::Any,
            allowed_function_names: None,
        },
        ToolChoice::Named { function, .. } => FunctionCallingConfig {
            mode: FunctionCallingMode::Any,
            allowed_function_names: Some(vec![function.name.clone()]),
        },
    };
    Some(ToolConfig {
        function_calling_config: config,
    })
}

fn map_generation_config(request: &ChatCompletionRequest) -> Option<GenerationConfig> {
    let mut config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        candidate_count: request.n,
        max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
        stop_sequences: request.stop.clone().map(|stop| stop.into_vec()),
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        seed: request.seed,
        response_logprobs: request.logprobs,
        logprobs: request.top_logprobs,
        ..GenerationConfig::default()
    };

    match request.response_format.as_ref() {
        Some(ResponseFormat::JsonObject) => {
            config.response_mime_type = Some("application/json".to_string());
        }
        Some(ResponseFormat::JsonSchema { json_schema }) => {
            config.response_mime_type = Some("application/json".to_string());
            config.response_schema = json_schema.schema.clone();
        }
        Some(ResponseFormat::Text) | None => {}
    }

    if let Some(effort) = request.reasoning_effort {
        config.thinking_config = Some(ThinkingConfig {
            include_thoughts: Some(true),
            thinking_budget: Some(thinking_budget(effort)),
        });
    }

    if config == GenerationConfig::default() {
        None
    } else {
        Some(config)
    }
}

fn thinking_budget(effort: ReasoningEffort) -> i64 {
    match effort {
        ReasoningEffort::Minimal => 512,
        ReasoningEffort::Low => 1024,
        ReasoningEffort::Medium => 8192,
        ReasoningEffort::High => 24576,
    }
}
