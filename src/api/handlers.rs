//! Route handlers (spec §6). Each one validates/translates its wire shape
//! and delegates to `SchedulerCore` or the backend client; none of them
//! contain scheduling logic of their own.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use uuid::Uuid;

use super::models::{BatchStatusRequest, BatchStatusResponse, SubmitRequest, SubmitResponse};
use super::AppState;
use crate::model::ExecutionLogEntry;

pub async fn liveness() -> &'static str {
    "OK"
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    if !req.tasks.iter().all(|t| t.1 == "UNDECIDED") {
        return Json(SubmitResponse::Failed {
            status: "Failed",
            reason: "endpoints should be 'UNDECIDED'".to_string(),
        });
    }

    let tasks: Vec<(String, Vec<u8>)> = req
        .tasks
        .into_iter()
        .map(|t| (t.0, serde_json::to_vec(&t.2).unwrap_or_default()))
        .collect();

    match state.core.batch_submit(tasks).await {
        Ok((task_uuids, endpoints)) => Json(SubmitResponse::Success {
            status: "Success",
            task_uuids,
            endpoints,
        }),
        Err(e) => Json(SubmitResponse::Failed {
            status: "Failed",
            reason: e.to_string(),
        }),
    }
}

pub async fn batch_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchStatusRequest>,
) -> impl IntoResponse {
    let mut real_ids: HashSet<String> = HashSet::new();
    for client_id in &req.task_ids {
        real_ids.extend(state.core.translate_task_id(client_id));
    }

    if !real_ids.is_empty() {
        let ids: Vec<String> = real_ids.into_iter().collect();
        match state.backend.batch_status(&ids).await {
            Ok(statuses) => {
                for (backend_id, status) in statuses {
                    state.core.log_status(&backend_id, status);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch_status backend call failed");
            }
        }
    }

    let mut results = std::collections::HashMap::new();
    for client_id in &req.task_ids {
        if let Some(status) = state.core.get_status(client_id) {
            if !status.is_terminal() {
                continue;
            }
            results.insert(*client_id, status);
        }
    }

    Json(BatchStatusResponse { response: "batch", results })
}

pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> impl IntoResponse {
    let real_ids = state.core.translate_task_id(&task_id);
    for backend_id in &real_ids {
        match state.backend.batch_status(std::slice::from_ref(backend_id)).await {
            Ok(statuses) => {
                if let Some(status) = statuses.get(backend_id) {
                    state.core.log_status(backend_id, status.clone());
                }
            }
            Err(e) => tracing::warn!(error = %e, backend_id = %backend_id, "status poll failed"),
        }
    }

    match state.core.get_status(&task_id) {
        Some(status) => Json(status).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown task id").into_response(),
    }
}

/// Opaque passthrough to the backend's `/register_function` (spec §6): the
/// scheduler never inspects this body.
pub async fn register_function(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let res = state
        .http
        .post(format!("{}/register_function", state.backend_base_url))
        .body(body)
        .send()
        .await;

    match res {
        Ok(res) => {
            let status = StatusCode::from_u16(res.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let body = res.bytes().await.unwrap_or_default();
            (status, body).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "register_function passthrough failed");
            (StatusCode::BAD_GATEWAY, "backend unreachable").into_response()
        }
    }
}

pub async fn block(
    State(state): State<Arc<AppState>>,
    Path((function_id, endpoint_id)): Path<(String, String)>,
) -> impl IntoResponse {
    state.core.blacklist(function_id, endpoint_id);
    "OK"
}

pub async fn execution_log(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let log: Vec<ExecutionLogEntry> = state.core.drain_execution_log();
    Json(serde_json::json!({ "log": log }))
}
