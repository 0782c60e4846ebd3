//! Core gateway abstractions: the account/key/provider domain model, the
//! model table with its flexible matching rule, the per-request throttle
//! engine, and the polymorphic provider-handler contract.
//!
//! This crate intentionally does **not** depend on axum, sea-orm or any
//! concrete HTTP client. Handlers receive typed requests and a credential
//! handle; a higher layer performs all persistence.

pub mod account;
pub mod errors;
pub mod handler;
pub mod key;
pub mod model_table;
pub mod registry;
pub mod throttle;

pub use account::{AccessToken, User};
pub use errors::AttemptError;
pub use handler::{
    Credential, HandlerBody, HandlerResponse, ProviderHandler, RequestCtx,
};
pub use key::{
    GLOBAL_BUCKET, KeyRecord, ProviderConfig, SharedKey, ThrottleBucket, ThrottleData,
    ThrottleMode, share_key,
};
pub use model_table::{ModelQuery, ModelSpec, apply_overrides, split_fallbacks};
pub use registry::HandlerRegistry;
pub use throttle::{EligibleKeys, KeyUpdate, ModelStatus, ThrottleEngine};
