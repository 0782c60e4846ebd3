use fleetgate_common::ErrorEnvelope;

/// Terminal routing outcomes, mapped onto the downstream error envelope.
#[derive(Debug)]
pub enum GatewayError {
    /// Missing or unresolvable token.
    Auth(String),
    /// Token valid but the surface is off-limits (access tokens on
    /// management endpoints).
    Forbidden(String),
    /// The request itself is unusable.
    BadRequest(String),
    /// No key was ever eligible across the whole fallback chain.
    NoEligibleKeys { details: Vec<String> },
    /// Every attempt failed; 429 when at least one failure was a throttle.
    Exhausted {
        throttled: bool,
        details: Vec<String>,
    },
    /// The credential store failed.
    Store(String),
}

impl GatewayError {
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Auth(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::BadRequest(_) => 400,
            GatewayError::Exhausted {
                throttled: true, ..
            } => 429,
            GatewayError::NoEligibleKeys { .. }
            | GatewayError::Exhausted { .. }
            | GatewayError::Store(_) => 500,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            GatewayError::Auth(message)
            | GatewayError::Forbidden(message)
            | GatewayError::BadRequest(message)
            | GatewayError::Store(message) => ErrorEnvelope::new(message.clone()),
            GatewayError::NoEligibleKeys { details } => {
                ErrorEnvelope::with_details("no keys available", details.clone())
            }
            GatewayError::Exhausted { throttled, details } => ErrorEnvelope::with_details(
                if *throttled {
                    "all available keys are rate limited"
                } else {
                    "all attempts failed"
                },
                details.clone(),
            ),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Auth(message) => write!(f, "unauthorized: {message}"),
            GatewayError::Forbidden(message) => write!(f, "forbidden: {message}"),
            GatewayError::BadRequest(message) => write!(f, "bad request: {message}"),
            GatewayError::NoEligibleKeys { .. } => f.write_str("no keys available"),
            GatewayError::Exhausted { throttled, .. } => {
                if *throttled {
                    f.write_str("all available keys are rate limited")
                } else {
                    f.write_str("all attempts failed")
                }
            }
            GatewayError::Store(message) => write!(f, "store error: {message}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::Auth("x".to_string()).status(), 401);
        assert_eq!(
            GatewayError::Exhausted {
                throttled: true,
                details: Vec::new()
            }
            .status(),
            429
        );
        assert_eq!(
            GatewayError::Exhausted {
                throttled: false,
                details: Vec::new()
            }
            .status(),
            500
        );
        assert_eq!(
            GatewayError::NoEligibleKeys {
                details: Vec::new()
            }
            .status(),
            500
        );
    }

    #[test]
    fn envelope_carries_details() {
        let envelope = GatewayError::Exhausted {
            throttled: true,
            details: vec!["k1: rate limited".to_string()],
        }
        .envelope();
        assert_eq!(envelope.error, "all available keys are rate limited");
        assert_eq!(envelope.details.unwrap().len(), 1);
    }
}
