pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use request::{ChatCompletionRequest, StreamOptions};
pub use response::{ChatChoice, ChatCompletion, ResponseMessage};
pub use stream::{ChatCompletionChunk, ChunkChoice, ChunkDelta, ToolCallChunk};
pub use types::{
    ChatContent, ChatMessage, CompletionTokensDetails, CompletionUsage, ContentPart, FinishReason,
    FunctionObject, PromptTokensDetails, ReasoningEffort, ResponseFormat, Stop, ToolCall,
    ToolChoice, ToolDefinition,
};
