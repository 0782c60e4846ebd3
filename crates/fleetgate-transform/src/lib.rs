//! Protocol adapters: bidirectional message/tool/stream conversion among the
//! OpenAI, Gemini and Claude wire formats, plus the Code-Assist envelope
//! unwrapper.
//!
//! Request-side conversions are plain functions; stream-side conversions are
//! explicit state objects with `transform_*`/`flush` methods that the caller
//! composes over its streaming primitive. Cross-format pairs without a direct
//! adapter chain through OpenAI (Claude on a Gemini upstream goes
//! Claude→OpenAI→Gemini down and Gemini→OpenAI→Claude up).

pub mod claude2openai;
pub mod codeassist;
pub mod gemini2openai;
pub mod openai2claude;
pub mod openai2gemini;
