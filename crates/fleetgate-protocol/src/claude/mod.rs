pub mod count_tokens;
pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use count_tokens::{CountTokensRequest, CountTokensResponse};
pub use request::{CreateMessageRequest, Metadata, ThinkingParam};
pub use response::{Message, StopReason, Usage};
pub use stream::{ContentBlockDelta, MessageDelta, MessageDeltaUsage, MessageStreamEvent};
pub use types::{
    ContentBlock, ContentBlockParam, DocumentSource, ImageSource, MessageContent, MessageParam,
    MessageRole, SystemPrompt, TextBlockParam, ToolChoiceParam, ToolParam, ToolResultContent,
};
