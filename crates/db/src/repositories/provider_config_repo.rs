//! Repository for the `provider_configs` table.

use async_trait::async_trait;
use imagegen_core::error::StoreError;
use imagegen_core::ports::ProviderConfigStore;
use imagegen_core::provider_config::{
    NewProviderConfig, ProviderConfig, ProviderConfigPatch, ProviderFilter,
};
use sqlx::PgPool;

use crate::rows::{store_error, ProviderConfigRow};

/// Column list for `provider_configs` queries.
const COLUMNS: &str = "\
    provider_name, display_name, api_key, api_base, enabled, models, \
    created_at, updated_at";

const ENTITY: &str = "ProviderConfig";

/// Provides CRUD operations for provider configuration rows.
pub struct ProviderConfigRepo;

impl ProviderConfigRepo {
    /// Find a provider configuration by its unique name.
    pub async fn find_by_name(
        pool: &PgPool,
        provider_name: &str,
    ) -> Result<Option<ProviderConfigRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM provider_configs WHERE provider_name = $1");
        sqlx::query_as::<_, ProviderConfigRow>(&query)
            .bind(provider_name)
            .fetch_optional(pool)
            .await
    }

    /// Insert a new provider configuration.
    pub async fn insert(
        pool: &PgPool,
        input: &NewProviderConfig,
    ) -> Result<ProviderConfigRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO provider_configs \
                 (provider_name, display_name, api_key, api_base, enabled, models) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProviderConfigRow>(&query)
            .bind(&input.provider_name)
            .bind(&input.display_name)
            .bind(&input.api_key)
            .bind(&input.api_base)
            .bind(input.enabled)
            .bind(&input.models)
            .fetch_one(pool)
            .await
    }

    /// Apply a field-level update. `NULL` parameters keep the stored value.
    pub async fn update(
        pool: &PgPool,
        provider_name: &str,
        patch: &ProviderConfigPatch,
    ) -> Result<Option<ProviderConfigRow>, sqlx::Error> {
        let query = format!(
            "UPDATE provider_configs \
             SET api_key = COALESCE($2, api_key), \
                 api_base = COALESCE($3, api_base), \
                 models = COALESCE($4, models), \
                 enabled = COALESCE($5, enabled), \
                 updated_at = NOW() \
             WHERE provider_name = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProviderConfigRow>(&query)
            .bind(provider_name)
            .bind(&patch.api_key)
            .bind(&patch.api_base)
            .bind(&patch.models)
            .bind(patch.enabled)
            .fetch_optional(pool)
            .await
    }

    /// List configurations matching the filter, ordered by name.
    pub async fn list(
        pool: &PgPool,
        filter: &ProviderFilter,
    ) -> Result<Vec<ProviderConfigRow>, sqlx::Error> {
        let name = filter
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let query = format!(
            "SELECT {COLUMNS} FROM provider_configs \
             WHERE ($1::BOOLEAN IS NULL OR enabled = $1) \
               AND ($2::TEXT IS NULL OR provider_name ILIKE '%' || $2 || '%') \
             ORDER BY provider_name ASC"
        );
        sqlx::query_as::<_, ProviderConfigRow>(&query)
            .bind(filter.enabled)
            .bind(name)
            .fetch_all(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// Port implementation
// ---------------------------------------------------------------------------

/// [`ProviderConfigStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgProviderConfigStore {
    pool: PgPool,
}

impl PgProviderConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderConfigStore for PgProviderConfigStore {
    async fn find(&self, provider_name: &str) -> Result<Option<ProviderConfig>, StoreError> {
        let row = ProviderConfigRepo::find_by_name(&self.pool, provider_name)
            .await
            .map_err(|e| store_error(e, ENTITY, provider_name))?;
        Ok(row.map(ProviderConfig::from))
    }

    async fn insert(&self, input: &NewProviderConfig) -> Result<ProviderConfig, StoreError> {
        ProviderConfigRepo::insert(&self.pool, input)
            .await
            .map(ProviderConfig::from)
            .map_err(|e| store_error(e, ENTITY, &input.provider_name))
    }

    async fn update(
        &self,
        provider_name: &str,
        patch: &ProviderConfigPatch,
    ) -> Result<ProviderConfig, StoreError> {
        ProviderConfigRepo::update(&self.pool, provider_name, patch)
            .await
            .map_err(|e| store_error(e, ENTITY, provider_name))?
            .map(ProviderConfig::from)
            .ok_or_else(|| StoreError::NotFound {
                entity: ENTITY,
                id: provider_name.to_string(),
            })
    }

    async fn list(&self, filter: &ProviderFilter) -> Result<Vec<ProviderConfig>, StoreError> {
        let rows = ProviderConfigRepo::list(&self.pool, filter)
            .await
            .map_err(|e| store_error(e, ENTITY, "*"))?;
        Ok(rows.into_iter().map(ProviderConfig::from).collect())
    }
}
