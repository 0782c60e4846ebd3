pub mod access_tokens;
pub mod keys;
pub mod providers;
pub mod users;

pub use access_tokens::Entity as AccessTokens;
pub use keys::Entity as Keys;
pub use providers::Entity as Providers;
pub use users::Entity as Users;
