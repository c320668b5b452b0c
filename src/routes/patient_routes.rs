// src/routes/patient_routes.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    models::{AppState, Patient},
    routes::{ApiOk, OkData, OkResponse},
    scheduling::{patients::PatientFields, window::ClinicTime},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(list_patients).post(create_patient))
        .route(
            "/patients/{patient_id}",
            get(get_patient)
                .put(put_patient)
                .patch(patch_patient)
                .delete(delete_patient),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRequest {
    pub last_name: Option<String>,
    #[serde(alias = "name")]
    pub first_name: Option<String>,
    #[serde(alias = "rg")]
    pub identity: Option<String>,
}

impl From<PatientRequest> for PatientFields {
    fn from(req: PatientRequest) -> Self {
        PatientFields {
            last_name: req.last_name,
            first_name: req.first_name,
            identity: req.identity,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDto {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub identity: String,
    // DD/MM/YYYY HH:MM, clinic time
    pub registered_at: String,
}

impl PatientDto {
    pub fn from_patient(p: Patient, clinic: &ClinicTime) -> Self {
        PatientDto {
            id: p.id,
            last_name: p.last_name,
            first_name: p.first_name,
            identity: p.identity,
            registered_at: clinic.format(p.registered_at),
        }
    }
}

pub async fn list_patients(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<PatientDto>>>, ApiError> {
    let rows = state.patients.list_all().await?;
    Ok(Json(ApiOk {
        data: rows
            .into_iter()
            .map(|p| PatientDto::from_patient(p, &state.clinic_time))
            .collect(),
    }))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> Result<Json<ApiOk<PatientDto>>, ApiError> {
    let patient = state.patients.get(patient_id).await?;
    Ok(Json(ApiOk {
        data: PatientDto::from_patient(patient, &state.clinic_time),
    }))
}

pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<PatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<PatientDto>>), ApiError> {
    let patient = state.patients.create(req.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: PatientDto::from_patient(patient, &state.clinic_time),
        }),
    ))
}

pub async fn put_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
    Json(req): Json<PatientRequest>,
) -> Result<Json<ApiOk<PatientDto>>, ApiError> {
    let patient = state.patients.replace(patient_id, req.into()).await?;
    Ok(Json(ApiOk {
        data: PatientDto::from_patient(patient, &state.clinic_time),
    }))
}

pub async fn patch_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
    Json(req): Json<PatientRequest>,
) -> Result<Json<ApiOk<PatientDto>>, ApiError> {
    let patient = state.patients.update(patient_id, req.into()).await?;
    Ok(Json(ApiOk {
        data: PatientDto::from_patient(patient, &state.clinic_time),
    }))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> Result<Json<OkResponse>, ApiError> {
    state.patients.delete(patient_id).await?;
    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
