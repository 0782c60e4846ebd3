//! Axum front door: the three protocol endpoints, the token-count estimate,
//! and the authentication layer that loads the user aggregate per request.

mod proxy;

pub use proxy::proxy_router;
