//! Concrete upstream handlers: Gemini-Code-Assist, CodeBuddy,
//! Google-AI-Studio and OpenAI-compatible, plus the registry that wires them
//! into the router.

pub mod providers;
pub mod registry;
pub(crate) mod upstream;

pub use registry::{build_registry, provider_seeds};
