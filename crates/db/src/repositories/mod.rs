//! Query repositories and the PostgreSQL implementations of the storage ports.

pub mod provider_config_repo;
pub mod task_repo;

pub use provider_config_repo::{PgProviderConfigStore, ProviderConfigRepo};
pub use task_repo::{PgTaskStore, TaskRepo};
