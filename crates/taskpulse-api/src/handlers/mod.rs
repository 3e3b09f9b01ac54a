//! HTTP and WebSocket handlers for taskpulse-api.

pub mod tasks;
pub mod ws;

use axum::response::IntoResponse;
use axum::Json;

pub use tasks::{
    create_task, delete_task, get_task, list_tasks, task_report, update_task, ListTasksQuery,
};
pub use ws::ws_handler;

/// `GET /health`
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
