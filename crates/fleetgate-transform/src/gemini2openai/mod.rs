//! Gemini generateContent response → OpenAI chat-completions response, in
//! both buffered and streaming form.

pub mod response;
pub mod stream;

pub use response::transform_response;
pub use stream::GeminiToOpenAiStream;

use fleetgate_protocol::gemini::types::FinishReason as GeminiFinishReason;
use fleetgate_protocol::gemini::response::UsageMetadata;
use fleetgate_protocol::openai::types::{
    CompletionTokensDetails, CompletionUsage, FinishReason, PromptTokensDetails,
};

pub(crate) fn map_finish_reason(reason: GeminiFinishReason) -> FinishReason {
    match reason {
        GeminiFinishReason::Stop => FinishReason::Stop,
        GeminiFinishReason::MaxTokens => FinishReason::Length,
        _ => FinishReason::ContentFilter,
    }
}

pub(crate) fn map_usage(usage: &UsageMetadata) -> CompletionUsage {
    let prompt_tokens = usage.prompt_token_count.unwrap_or(0);
    let completion_tokens = usage.candidates_token_count.unwrap_or(0);
    let prompt_audio =
        UsageMetadata::modality_tokens(usage.prompt_tokens_details.as_deref(), "AUDIO");
    let completion_audio =
        UsageMetadata::modality_tokens(usage.candidates_tokens_details.as_deref(), "AUDIO");

    let completion_details = if usage.thoughts_token_count.is_some() || completion_audio.is_some() {
        Some(CompletionTokensDetails {
            reasoning_tokens: usage.thoughts_token_count,
            audio_tokens: completion_audio,
        })
    } else {
        None
    };
    let prompt_details = if usage.cached_content_token_count.is_some() || prompt_audio.is_some() {
        Some(PromptTokensDetails {
            cached_tokens: usage.cached_content_token_count,
            audio_tokens: prompt_audio,
        })
    } else {
        None
    };

    CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: usage
            .total_token_count
            .unwrap_or(prompt_tokens + completion_tokens),
        completion_tokens_details: completion_details,
        prompt_tokens_details: prompt_details,
    }
}
