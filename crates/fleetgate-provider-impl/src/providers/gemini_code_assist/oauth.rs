//! Google installed-app OAuth for the Code-Assist upstream: parse the stored
//! credential blob, refresh the access token when expiry is imminent, and
//! classify `invalid_grant` as a permanent key failure.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use fleetgate_common::now_unix_ms;
use fleetgate_provider_core::{AttemptError, Credential, RequestCtx};

use crate::providers::{http_client, key_data};
use crate::upstream::{read_body_text, send_logged};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";

/// Refresh this close to `expiry_date` (unix ms).
const EXPIRY_SLACK_MS: i64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct GcaCredential {
    #[serde(default)]
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub(super) fn parse_credential(key_data_value: &JsonValue) -> Result<GcaCredential, AttemptError> {
    let normalized = key_data::normalize(key_data_value);
    serde_json::from_value(normalized)
        .map_err(|err| AttemptError::InvalidKeyData(format!("code-assist credential: {err}")))
}

pub(super) fn project_id(credential: &GcaCredential) -> Result<&str, AttemptError> {
    credential
        .project_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AttemptError::InvalidKeyData("missing project_id".to_string()))
}

/// Return a usable access token, refreshing first when forced or when the
/// stored expiry is within slack. A successful refresh mutates the key's
/// in-memory `keyData` and stages it for commit.
pub(super) async fn ensure_fresh(
    ctx: &RequestCtx,
    credential: &Credential<'_>,
    force: bool,
) -> Result<GcaCredential, AttemptError> {
    let parsed = {
        let record = credential.key.lock().expect("key lock");
        parse_credential(&record.key_data)?
    };

    let stale = parsed.access_token.is_empty()
        || parsed
            .expiry_date
            .is_none_or(|expiry| expiry - now_unix_ms() < EXPIRY_SLACK_MS);
    if !force && !stale {
        return Ok(parsed);
    }

    refresh(ctx, credential, parsed).await
}

async fn refresh(
    ctx: &RequestCtx,
    credential: &Credential<'_>,
    mut parsed: GcaCredential,
) -> Result<GcaCredential, AttemptError> {
    let client = http_client::shared_client()?;
    let form = [
        ("client_id", CLIENT_ID),
        ("client_secret", CLIENT_SECRET),
        ("refresh_token", parsed.refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];
    let response = send_logged(
        ctx,
        super::PROVIDER_NAME,
        client.post(TOKEN_URL).form(&form),
        TOKEN_URL,
        None,
        false,
    )
    .await?;

    let status = response.status();
    if !status.is_success() {
        let body = read_body_text(response).await;
        if body.contains("invalid_grant") || status.as_u16() == 401 {
            credential.feedback.record_permanently_failed(credential.key);
            return Err(AttemptError::PermanentKeyFailure(format!(
                "oauth refresh rejected: {}",
                crate::upstream::error_snippet(&body)
            )));
        }
        return Err(AttemptError::Upstream(format!(
            "oauth refresh failed with status {}",
            status.as_u16()
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|err| AttemptError::Upstream(format!("oauth refresh body: {err}")))?;

    parsed.access_token = token.access_token;
    parsed.expiry_date = token
        .expires_in
        .map(|seconds| now_unix_ms() + seconds * 1000);

    {
        let mut record = credential.key.lock().expect("key lock");
        record.key_data = serde_json::to_value(&parsed)
            .map_err(|err| AttemptError::InvalidKeyData(err.to_string()))?;
    }
    credential.feedback.record_key_data_updated(credential.key);

    Ok(parsed)
}
