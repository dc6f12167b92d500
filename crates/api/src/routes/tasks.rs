//! Route definitions for the `/tasks` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/tasks`.
///
/// ```text
/// GET    /                     -> list_tasks
/// POST   /                     -> enqueue_task
/// GET    /{task_id}            -> get_task
/// POST   /{task_id}/cancel     -> cancel_task
/// POST   /{task_id}/retry      -> retry_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::enqueue_task))
        .route("/{task_id}", get(tasks::get_task))
        .route("/{task_id}/cancel", post(tasks::cancel_task))
        .route("/{task_id}/retry", post(tasks::retry_task))
}

/// Subscription route mounted at `/tasks`.
///
/// ```text
/// GET    /{task_id}/ws         -> ws::task_ws_handler
/// ```
pub fn subscription_router() -> Router<AppState> {
    Router::new().route("/{task_id}/ws", get(ws::task_ws_handler))
}
