use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "user_token")]
    pub token: String,
    pub name: Option<String>,
    pub model_aliases: Option<Json>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub keys: HasMany<super::keys::Entity>,
    #[sea_orm(has_many)]
    pub access_tokens: HasMany<super::access_tokens::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
