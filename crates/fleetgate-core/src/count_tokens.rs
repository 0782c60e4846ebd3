//! Local token-count estimate for the Claude `count_tokens` endpoint. No
//! upstream call: a character-based approximation (~4 chars per token) over
//! system, messages and tool definitions.

use fleetgate_protocol::claude::count_tokens::{CountTokensRequest, CountTokensResponse};
use fleetgate_protocol::claude::types::{ContentBlockParam, MessageContent, ToolResultContent};

const CHARS_PER_TOKEN: usize = 4;

pub fn estimate(request: &CountTokensRequest) -> CountTokensResponse {
    let mut chars = 0usize;

    if let Some(system) = &request.system {
        chars += system.joined_text().chars().count();
    }
    for message in &request.messages {
        chars += content_chars(&message.content);
    }
    if let Some(tools) = &request.tools {
        for tool in tools {
            chars += tool.name.chars().count();
            chars += tool
                .description
                .as_deref()
                .map(|text| text.chars().count())
                .unwrap_or(0);
            chars += tool
                .input_schema
                .as_ref()
                .and_then(|schema| serde_json::to_string(schema).ok())
                .map(|json| json.chars().count())
                .unwrap_or(0);
        }
    }

    CountTokensResponse {
        input_tokens: (chars.div_ceil(CHARS_PER_TOKEN)).max(1) as i64,
    }
}

fn content_chars(content: &MessageContent) -> usize {
    match content {
        MessageContent::Text(text) => text.chars().count(),
        MessageContent::Blocks(blocks) => blocks.iter().map(block_chars).sum(),
    }
}

fn block_chars(block: &ContentBlockParam) -> usize {
    match block {
        ContentBlockParam::Text { text } => text.chars().count(),
        ContentBlockParam::Thinking { thinking, .. } => thinking.chars().count(),
        ContentBlockParam::ToolUse { name, input, .. } => {
            name.chars().count()
                + serde_json::to_string(input)
                    .map(|json| json.chars().count())
                    .unwrap_or(0)
        }
        ContentBlockParam::ToolResult { content, .. } => match content {
            Some(ToolResultContent::Text(text)) => text.chars().count(),
            Some(ToolResultContent::Blocks(blocks)) => blocks.iter().map(block_chars).sum(),
            None => 0,
        },
        // Binary payloads count as a flat overhead.
        ContentBlockParam::Image { .. } | ContentBlockParam::Document { .. } => 1_500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::claude::types::{MessageParam, MessageRole, SystemPrompt};

    #[test]
    fn estimate_scales_with_text() {
        let request = CountTokensRequest {
            model: "claude-test".to_string(),
            messages: vec![MessageParam {
                role: MessageRole::User,
                content: MessageContent::Text("a".repeat(400)),
            }],
            system: Some(SystemPrompt::Text("b".repeat(100))),
            tools: None,
        };
        assert_eq!(estimate(&request).input_tokens, 125);
    }

    #[test]
    fn estimate_never_reports_zero() {
        let request = CountTokensRequest {
            model: "claude-test".to_string(),
            messages: Vec::new(),
            system: None,
            tools: None,
        };
        assert_eq!(estimate(&request).input_tokens, 1);
    }
}
