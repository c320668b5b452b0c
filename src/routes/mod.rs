use crate::models::AppState;
use axum::Router;
use serde::Serialize;

pub mod appointment_routes;
pub mod dentist_routes;
pub mod health_routes;
pub mod patient_routes;

/* ============================================================
   Shared response envelopes
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", dentist_routes::router())
        .nest("/api/v1", patient_routes::router())
        .merge(health_routes::router())
        .with_state(state)
}
