//! The gateway core: token authentication and the request router that walks
//! the fallback chain, selects keys through the throttle engine, dispatches
//! to provider handlers and commits buffered state.

pub mod auth;
pub mod count_tokens;
pub mod engine;
pub mod error;

pub use auth::{AuthedUser, authenticate, extract_token};
pub use engine::{GatewayEngine, InboundRequest};
pub use error::GatewayError;
