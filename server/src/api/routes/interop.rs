//! Interop coordination endpoints

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::api::extractors::{ApiJson, RunPath};
use crate::api::types::{ApiError, RunStarted};
use crate::data::{StoreStats, TraceStore};
use crate::domain::interop::{InteropService, RegistrationRequest, RunState, Service};

#[derive(Clone)]
pub struct InteropApiState {
    pub service: Arc<InteropService>,
    pub store: Arc<TraceStore>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub server_name: String,
    pub services: usize,
}

/// Build interop API routes
pub fn routes(service: Arc<InteropService>, store: Arc<TraceStore>) -> Router<()> {
    let state = InteropApiState { service, store };

    Router::new()
        .route("/register", post(register))
        .route("/services", get(list_services))
        .route("/run", post(run))
        .route("/result/{id}", get(result))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn register(
    State(state): State<InteropApiState>,
    ApiJson(request): ApiJson<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let services = request.services.len();
    state
        .service
        .registry()
        .register(&request.server_name, request.services)?;
    tracing::info!(server = %request.server_name, services, "Test server registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            server_name: request.server_name.trim().to_string(),
            services,
        }),
    ))
}

async fn list_services(
    State(state): State<InteropApiState>,
) -> Json<BTreeMap<String, Vec<Service>>> {
    Json(state.service.registry().list())
}

async fn run(
    State(state): State<InteropApiState>,
) -> Result<(StatusCode, Json<RunStarted>), ApiError> {
    let id = state.service.run()?;
    Ok((StatusCode::ACCEPTED, Json(RunStarted { id })))
}

async fn result(
    State(state): State<InteropApiState>,
    RunPath(id): RunPath,
) -> Result<Json<RunState>, ApiError> {
    state
        .service
        .result(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("RUN_NOT_FOUND", format!("run {} not found", id)))
}

async fn stats(State(state): State<InteropApiState>) -> Json<StoreStats> {
    Json(state.store.stats())
}
