//! Persistence for fleetgate: SeaORM entities for the four relational
//! tables (users, access_tokens, providers, keys) and the credential-store
//! contract the request path runs against.

pub mod entities;
pub mod seaorm;
pub mod store;

pub use seaorm::SeaOrmStore;
pub use store::{CredentialStore, ProviderSeed, StorageError, StorageResult};
