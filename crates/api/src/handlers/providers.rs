//! Handlers for the `/providers` resource.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use imagegen_core::provider_config::{ModelEntry, ProviderConfig, ProviderFilter};
use imagegen_core::types::Timestamp;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Public view of a provider configuration. Never carries the API key.
#[derive(Debug, Serialize)]
pub struct ProviderView {
    pub provider_name: String,
    pub display_name: String,
    pub api_base: String,
    pub enabled: bool,
    pub has_api_key: bool,
    /// Whether the registry currently holds a live instance.
    pub live: bool,
    pub models: Vec<ModelEntry>,
    pub updated_at: Timestamp,
}

impl ProviderView {
    fn new(config: ProviderConfig, live: bool) -> Self {
        let models = config.declared_models();
        Self {
            provider_name: config.provider_name,
            display_name: config.display_name,
            api_base: config.api_base,
            enabled: config.enabled,
            has_api_key: !config.api_key.is_empty(),
            live,
            models,
            updated_at: config.updated_at,
        }
    }
}

/// GET /api/v1/providers?enabled=&name=
pub async fn list_providers(
    State(state): State<AppState>,
    Query(filter): Query<ProviderFilter>,
) -> AppResult<impl IntoResponse> {
    let configs = state.provider_configs.list(&filter).await?;
    let views: Vec<ProviderView> = configs
        .into_iter()
        .map(|config| {
            let live = state.registry.get(&config.provider_name).is_some();
            ProviderView::new(config, live)
        })
        .collect();
    Ok(Json(DataResponse { data: views }))
}
