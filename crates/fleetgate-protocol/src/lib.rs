//! Wire types for the three protocols fleetgate speaks, plus an incremental
//! SSE parser. This crate holds data shapes only; conversions live in
//! `fleetgate-transform`.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;
