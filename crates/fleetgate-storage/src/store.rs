use async_trait::async_trait;

use fleetgate_provider_core::{AccessToken, KeyUpdate, User};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid provider config: {0}")]
    InvalidProviderConfig(String),
}

/// Default configuration installed for a registered handler when its provider
/// row is missing at bootstrap. Existing rows are admin-owned and never
/// overwritten.
#[derive(Debug, Clone)]
pub struct ProviderSeed {
    pub name: &'static str,
    pub display_name: &'static str,
    pub throttle_mode: &'static str,
    pub min_throttle_minutes: i64,
    pub max_throttle_minutes: i64,
    pub models: Vec<&'static str>,
    pub native_protocols: Vec<&'static str>,
}

/// The credential store the request path runs against.
///
/// Reads load full aggregates (user with keys, each key with its provider);
/// the only runtime write is the per-key field update the throttle engine
/// commits after an attempt loop.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Entity-first schema sync, run once at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn find_user_by_token(&self, token: &str) -> StorageResult<Option<User>>;
    async fn find_access_token(&self, token: &str) -> StorageResult<Option<AccessToken>>;
    async fn find_user_by_id(&self, user_id: i64) -> StorageResult<Option<User>>;

    /// Apply a staged mutation to one key row. One call issues one write.
    async fn update_key(&self, key_id: i64, update: KeyUpdate) -> StorageResult<()>;

    /// Insert the seed if no provider row with that name exists.
    async fn ensure_provider(&self, seed: &ProviderSeed) -> StorageResult<()>;
}
