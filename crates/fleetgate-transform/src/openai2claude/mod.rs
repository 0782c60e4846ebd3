//! OpenAI chat-completions response → Claude messages response, buffered and
//! streaming.

pub mod response;
pub mod stream;

pub use response::transform_response;
pub use stream::OpenAiToClaudeStream;

use fleetgate_protocol::claude::response::StopReason;
use fleetgate_protocol::openai::types::FinishReason;

pub(crate) fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::Refusal,
    }
}
