use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, QueryFilter, Schema,
};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use fleetgate_common::Protocol;
use fleetgate_provider_core::{
    AccessToken, KeyRecord, KeyUpdate, ModelSpec, ProviderConfig, ThrottleData, ThrottleMode, User,
};

use crate::entities;
use crate::store::{CredentialStore, ProviderSeed, StorageError, StorageResult};

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        // sqlite needs this for cascade + restrict enforcement.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn load_user(&self, row: entities::users::Model) -> StorageResult<User> {
        use entities::keys::Column as KeyColumn;

        let key_rows = entities::Keys::find()
            .filter(KeyColumn::UserId.eq(row.id))
            .all(&self.db)
            .await?;

        let provider_ids: Vec<i64> = key_rows.iter().map(|key| key.provider_id).collect();
        let mut providers: HashMap<i64, Arc<ProviderConfig>> = HashMap::new();
        if !provider_ids.is_empty() {
            use entities::providers::Column as ProviderColumn;
            for provider in entities::Providers::find()
                .filter(ProviderColumn::Id.is_in(provider_ids))
                .all(&self.db)
                .await?
            {
                providers.insert(provider.id, Arc::new(provider_config(provider)?));
            }
        }

        let mut keys = Vec::with_capacity(key_rows.len());
        for key in key_rows {
            let Some(provider) = providers.get(&key.provider_id).cloned() else {
                // Orphaned key rows are skipped rather than failing the login.
                continue;
            };
            keys.push(key_record(key, provider)?);
        }

        let model_aliases = match row.model_aliases {
            Some(value) => serde_json::from_value(value)?,
            None => HashMap::new(),
        };

        Ok(User {
            id: row.id,
            token: row.token,
            name: row.name,
            model_aliases,
            keys,
        })
    }
}

#[async_trait]
impl CredentialStore for SeaOrmStore {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Users)
            .register(entities::AccessTokens)
            .register(entities::Providers)
            .register(entities::Keys)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn find_user_by_token(&self, token: &str) -> StorageResult<Option<User>> {
        use entities::users::Column;
        let row = entities::Users::find()
            .filter(Column::Token.eq(token))
            .one(&self.db)
            .await?;
        match row {
            Some(row) => Ok(Some(self.load_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_access_token(&self, token: &str) -> StorageResult<Option<AccessToken>> {
        use entities::access_tokens::Column;
        let row = entities::AccessTokens::find()
            .filter(Column::Token.eq(token))
            .one(&self.db)
            .await?;
        Ok(row.map(|row| AccessToken {
            id: row.id,
            token: row.token,
            user_id: row.user_id,
        }))
    }

    async fn find_user_by_id(&self, user_id: i64) -> StorageResult<Option<User>> {
        let row = entities::Users::find_by_id(user_id).one(&self.db).await?;
        match row {
            Some(row) => Ok(Some(self.load_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn update_key(&self, key_id: i64, update: KeyUpdate) -> StorageResult<()> {
        let mut active = entities::keys::ActiveModel {
            id: ActiveValue::Unchanged(key_id),
            ..Default::default()
        };
        if let Some(throttle) = update.throttle_data {
            active.throttle_data = ActiveValue::Set(if throttle.is_null() {
                None
            } else {
                Some(throttle)
            });
        }
        if let Some(key_data) = update.key_data {
            active.key_data = ActiveValue::Set(key_data);
        }
        if let Some(failed) = update.permanently_failed {
            active.permanently_failed = ActiveValue::Set(failed);
        }
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn ensure_provider(&self, seed: &ProviderSeed) -> StorageResult<()> {
        use entities::providers::Column;
        let existing = entities::Providers::find()
            .filter(Column::Name.eq(seed.name))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Ok(());
        }
        let active = entities::providers::ActiveModel {
            name: ActiveValue::Set(seed.name.to_string()),
            display_name: ActiveValue::Set(seed.display_name.to_string()),
            throttle_mode: ActiveValue::Set(seed.throttle_mode.to_string()),
            min_throttle_minutes: ActiveValue::Set(seed.min_throttle_minutes),
            max_throttle_minutes: ActiveValue::Set(seed.max_throttle_minutes),
            models: ActiveValue::Set(serde_json::to_value(&seed.models)?),
            native_protocols: ActiveValue::Set(serde_json::to_value(&seed.native_protocols)?),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        active.insert(&self.db).await?;
        Ok(())
    }
}

fn provider_config(row: entities::providers::Model) -> StorageResult<ProviderConfig> {
    let throttle_mode = match row.throttle_mode.as_str() {
        "BY_KEY" => ThrottleMode::ByKey,
        "BY_MODEL" => ThrottleMode::ByModel,
        other => {
            return Err(StorageError::InvalidProviderConfig(format!(
                "unknown throttle mode {other:?} on provider {}",
                row.name
            )));
        }
    };
    if row.min_throttle_minutes < 0 || row.min_throttle_minutes > row.max_throttle_minutes {
        return Err(StorageError::InvalidProviderConfig(format!(
            "bad throttle window on provider {}",
            row.name
        )));
    }

    let model_specs: Vec<String> = serde_json::from_value(row.models)?;
    let protocol_names: Vec<String> = serde_json::from_value(row.native_protocols)?;
    let native_protocols = protocol_names
        .iter()
        .filter_map(|name| match name.as_str() {
            "openai" => Some(Protocol::OpenAI),
            "gemini" => Some(Protocol::Gemini),
            "claude" => Some(Protocol::Claude),
            _ => None,
        })
        .collect();

    Ok(ProviderConfig {
        id: row.id,
        name: row.name,
        display_name: row.display_name,
        throttle_mode,
        min_throttle_minutes: row.min_throttle_minutes,
        max_throttle_minutes: row.max_throttle_minutes,
        models: model_specs
            .iter()
            .map(|spec| ModelSpec::parse(spec))
            .collect(),
        native_protocols,
    })
}

fn key_record(
    row: entities::keys::Model,
    provider: Arc<ProviderConfig>,
) -> StorageResult<KeyRecord> {
    let throttle = match row.throttle_data {
        Some(JsonValue::Null) | None => ThrottleData::default(),
        Some(value) => serde_json::from_value(value)?,
    };
    let available_models = match row.available_models {
        Some(JsonValue::Null) | None => None,
        Some(value) => Some(serde_json::from_value(value)?),
    };
    Ok(KeyRecord {
        id: row.id,
        provider,
        key_data: row.key_data,
        throttle,
        permanently_failed: row.permanently_failed,
        paused: row.paused,
        notes: row.notes,
        base_url: row.base_url,
        available_models,
    })
}
