use std::sync::OnceLock;

use fleetgate_provider_core::AttemptError;

static SHARED_CLIENT: OnceLock<wreq::Client> = OnceLock::new();

/// One process-wide client; connections are pooled per upstream host.
pub(crate) fn shared_client() -> Result<wreq::Client, AttemptError> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client.clone());
    }
    let client = wreq::Client::builder()
        .build()
        .map_err(|err| AttemptError::Upstream(err.to_string()))?;
    let _ = SHARED_CLIENT.set(client);
    Ok(SHARED_CLIENT.get().expect("http client").clone())
}
