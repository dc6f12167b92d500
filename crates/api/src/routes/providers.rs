//! Route definitions for the `/providers` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::providers;
use crate::state::AppState;

/// Routes mounted at `/providers`.
///
/// ```text
/// GET    /    -> list_providers (?enabled=&name=)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(providers::list_providers))
}
