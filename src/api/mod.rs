//! Thin HTTP front-end (spec §6), modeled on the teacher's
//! `api/rest/{server,handlers}.rs`: an `axum` router holding the core as
//! state, with every route a one-line delegation to `SchedulerCore` or the
//! backend client. No scheduling decision is made in this module.

mod handlers;
mod models;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::backend_client::BackendClient;
use crate::scheduler::SchedulerCore;

pub struct AppState {
    pub core: Arc<SchedulerCore>,
    pub backend: Arc<dyn BackendClient>,
    pub http: reqwest::Client,
    pub backend_base_url: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::liveness))
        .route("/submit", post(handlers::submit))
        .route("/batch_status", post(handlers::batch_status))
        .route("/{task_id}/status", get(handlers::task_status))
        .route("/register_function", post(handlers::register_function))
        .route("/block/{function_id}/{endpoint_id}", get(handlers::block))
        .route("/execution_log", get(handlers::execution_log))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
