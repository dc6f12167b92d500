pub mod health;
pub mod providers;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /tasks                     enqueue, list
/// /tasks/{task_id}           status query
/// /tasks/{task_id}/cancel    withdraw a queued task
/// /tasks/{task_id}/retry     resubmit a failed task
/// /providers                 provider configurations
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/providers", providers::router())
}

/// Long-lived `/api/v1` routes.
///
/// ```text
/// /tasks/{task_id}/ws        push subscription (WebSocket)
/// ```
pub fn subscription_routes() -> Router<AppState> {
    Router::new().nest("/tasks", tasks::subscription_router())
}
