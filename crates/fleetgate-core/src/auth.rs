//! Token resolution: locate the token in the request, resolve it to a user
//! with eagerly loaded keys, and flag access-token logins so management
//! surfaces can refuse them.

use http::HeaderMap;

use fleetgate_provider_core::User;
use fleetgate_storage::CredentialStore;

use crate::error::GatewayError;

const ACCESS_TOKEN_PREFIX: &str = "sk-api-";

#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user: User,
    /// True when the request authenticated through an `sk-api-` access
    /// token; management endpoints must answer 403.
    pub via_access_token: bool,
}

/// Locate the downstream token: `Authorization: Bearer`, then
/// `x-goog-api-key`, then the `key` query parameter.
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        for prefix in ["Bearer ", "bearer "] {
            if let Some(token) = value.strip_prefix(prefix) {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    if let Some(value) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    query_param(query?, "key")
}

fn query_param(query: &str, name: &str) -> Option<String> {
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key == name && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

pub async fn authenticate(
    store: &dyn CredentialStore,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<AuthedUser, GatewayError> {
    let Some(token) = extract_token(headers, query) else {
        return Err(GatewayError::Auth("missing api token".to_string()));
    };

    if token.starts_with(ACCESS_TOKEN_PREFIX) {
        let access = store
            .find_access_token(&token)
            .await
            .map_err(|err| GatewayError::Store(err.to_string()))?
            .ok_or_else(|| GatewayError::Auth("invalid api token".to_string()))?;
        let user = store
            .find_user_by_id(access.user_id)
            .await
            .map_err(|err| GatewayError::Store(err.to_string()))?
            .ok_or_else(|| GatewayError::Auth("invalid api token".to_string()))?;
        return Ok(AuthedUser {
            user,
            via_access_token: true,
        });
    }

    let user = store
        .find_user_by_token(&token)
        .await
        .map_err(|err| GatewayError::Store(err.to_string()))?
        .ok_or_else(|| GatewayError::Auth("invalid api token".to_string()))?;
    Ok(AuthedUser {
        user,
        via_access_token: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn bearer_wins_over_goog_header_and_query() {
        let map = headers(&[
            ("authorization", "Bearer sk-primary"),
            ("x-goog-api-key", "sk-secondary"),
        ]);
        assert_eq!(
            extract_token(&map, Some("key=sk-query")).as_deref(),
            Some("sk-primary")
        );
    }

    #[test]
    fn goog_header_then_query() {
        let map = headers(&[("x-goog-api-key", "sk-goog")]);
        assert_eq!(extract_token(&map, None).as_deref(), Some("sk-goog"));

        let empty = headers(&[]);
        assert_eq!(
            extract_token(&empty, Some("alt=sse&key=sk-query")).as_deref(),
            Some("sk-query")
        );
        assert_eq!(extract_token(&empty, Some("alt=sse")), None);
        assert_eq!(extract_token(&empty, None), None);
    }
}
