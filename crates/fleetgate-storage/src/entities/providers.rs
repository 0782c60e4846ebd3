use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    pub display_name: String,
    /// BY_KEY or BY_MODEL.
    pub throttle_mode: String,
    pub min_throttle_minutes: i64,
    pub max_throttle_minutes: i64,
    /// Ordered list of `baseId[$alias]` specs.
    pub models: Json,
    pub native_protocols: Json,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub keys: HasMany<super::keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
