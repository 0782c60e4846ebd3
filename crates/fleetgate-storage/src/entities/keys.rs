use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub provider_id: i64,
    /// Opaque provider-specific credential blob.
    pub key_data: Json,
    pub throttle_data: Option<Json>,
    pub permanently_failed: bool,
    pub paused: bool,
    pub notes: Option<String>,
    pub base_url: Option<String>,
    pub available_models: Option<Json>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
    // Providers with dependent keys must not be deletable.
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Restrict")]
    pub provider: HasOne<super::providers::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
