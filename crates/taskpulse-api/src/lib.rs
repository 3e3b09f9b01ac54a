//! # taskpulse-api
//!
//! HTTP and WebSocket surface for taskpulse.
//!
//! - Task CRUD and report routes under `/api/v1/tasks`
//! - Owner-scoped live change stream at `/api/v1/ws`
//! - Per-owner task list cache, mutation coordinator and report aggregator
//! - Optional Redis relay for multi-process event delivery

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod services;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use taskpulse_core::defaults::CORS_MAX_AGE_SECS;

pub use config::ApiConfig;
pub use context::{AppContext, AppState};
pub use error::ApiError;

use handlers::{
    create_task, delete_task, get_task, health_check, list_tasks, task_report, update_task,
    ws_handler,
};

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(CORS_MAX_AGE_SECS))
}

/// Build the application router with its middleware stack.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route("/api/v1/tasks/report", get(task_report))
        .route(
            "/api/v1/tasks/:id",
            get(get_task)
                .patch(update_task)
                .put(update_task)
                .delete(delete_task),
        )
        .route("/api/v1/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors_layer(allowed_origins))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
