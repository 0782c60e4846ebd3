pub mod request;
pub mod response;
pub mod types;

pub use request::{GenerateContentBody, GenerateContentRequest};
pub use response::{Candidate, GenerateContentResponse, ModalityTokenCount, UsageMetadata};
pub use types::{
    Blob, Content, FileData, FinishReason, FunctionCall, FunctionCallingConfig,
    FunctionCallingMode, FunctionDeclaration, FunctionResponse, GenerationConfig, Part,
    ThinkingConfig, Tool, ToolConfig,
};
