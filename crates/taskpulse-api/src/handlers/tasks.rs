//! Task CRUD and report handlers.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use taskpulse_core::{CreateTaskRequest, TaskFilter, UpdateTaskRequest};

use crate::auth::RequireAuth;
use crate::context::AppState;
use crate::error::ApiError;

/// Raw list filters; parsed case-insensitively into a [`TaskFilter`].
#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub priority: Option<String>,
    pub status: Option<String>,
    /// `YYYY-MM-DD`, matched against the due date's UTC calendar day.
    pub due_date: Option<String>,
}

fn task_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid task id: {}", e.body_text())))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// `POST /api/v1/tasks`
pub async fn create_task(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.coordinator.create(user.id, body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// `GET /api/v1/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    query: Result<Query<ListTasksQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let filter = TaskFilter::parse(
        query.priority.as_deref(),
        query.status.as_deref(),
        query.due_date.as_deref(),
    )?;
    let tasks = state.coordinator.list(user.id, &filter).await?;
    Ok(Json(tasks))
}

/// `GET /api/v1/tasks/:id`
pub async fn get_task(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.coordinator.retrieve(user.id, task_id(path)?).await?;
    Ok(Json(task))
}

/// `PATCH /api/v1/tasks/:id` (also `PUT`)
pub async fn update_task(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = task_id(path)?;
    let task = state.coordinator.update(user.id, id, body(payload)?).await?;
    Ok(Json(task))
}

/// `DELETE /api/v1/tasks/:id`
pub async fn delete_task(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.delete(user.id, task_id(path)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/tasks/report`
pub async fn task_report(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.reports.report(user.id).await?;
    Ok(Json(report))
}
