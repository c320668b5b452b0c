// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    models::{AppState, AppointmentDetail},
    routes::{dentist_routes::DentistDto, patient_routes::PatientDto, ApiOk, OkData, OkResponse},
    scheduling::{appointments::AppointmentFields, window::ClinicTime},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/availability", get(check_availability))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .put(put_appointment)
                .patch(patch_appointment)
                .delete(delete_appointment),
        )
        .route("/appointments/patient/{identity}", get(list_for_patient))
        .route("/appointments/dentist/{license}", get(list_for_dentist))
}

/* ============================================================
   DTOs
   ============================================================ */

/// Create, PUT and PATCH share one body; which fields are mandatory
/// depends on the verb.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub description: Option<String>,
    pub date_and_time: Option<String>,
    #[serde(alias = "dentistCRO")]
    pub dentist_license: Option<String>,
    #[serde(alias = "patientRG")]
    pub patient_identity: Option<String>,
}

impl From<AppointmentRequest> for AppointmentFields {
    fn from(req: AppointmentRequest) -> Self {
        AppointmentFields {
            description: req.description,
            date_and_time: req.date_and_time,
            dentist_license: req.dentist_license,
            patient_identity: req.patient_identity,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDto {
    pub id: i64,
    pub description: String,
    pub date_and_time: String,
    pub dentist: DentistDto,
    pub patient: PatientDto,
}

impl AppointmentDto {
    fn from_detail(detail: AppointmentDetail, clinic: &ClinicTime) -> Self {
        AppointmentDto {
            id: detail.appointment.id,
            description: detail.appointment.description,
            date_and_time: clinic.format(detail.appointment.start_at),
            dentist: DentistDto::from(detail.dentist),
            patient: PatientDto::from_patient(detail.patient, clinic),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub date_and_time: Option<String>,
    pub dentist_license: Option<String>,
    pub patient_identity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityDto {
    pub available: bool,
}

fn to_dtos(details: Vec<AppointmentDetail>, clinic: &ClinicTime) -> Vec<AppointmentDto> {
    details
        .into_iter()
        .map(|d| AppointmentDto::from_detail(d, clinic))
        .collect()
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let rows = state.appointments.list_all().await?;
    Ok(Json(ApiOk {
        data: to_dtos(rows, &state.clinic_time),
    }))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let detail = state.appointments.get(appointment_id).await?;
    Ok(Json(ApiOk {
        data: AppointmentDto::from_detail(detail, &state.clinic_time),
    }))
}

pub async fn list_for_patient(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let rows = state.appointments.list_by_patient(&identity).await?;
    Ok(Json(ApiOk {
        data: to_dtos(rows, &state.clinic_time),
    }))
}

pub async fn list_for_dentist(
    State(state): State<AppState>,
    Path(license): Path<String>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let rows = state.appointments.list_by_dentist(&license).await?;
    Ok(Json(ApiOk {
        data: to_dtos(rows, &state.clinic_time),
    }))
}

/// GET /appointments/availability?dateAndTime=..&dentistLicense=..&patientIdentity=..
pub async fn check_availability(
    State(state): State<AppState>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<ApiOk<AvailabilityDto>>, ApiError> {
    let available = state
        .appointments
        .is_available(
            q.date_and_time.as_deref(),
            q.dentist_license.as_deref(),
            q.patient_identity.as_deref(),
        )
        .await?;
    Ok(Json(ApiOk {
        data: AvailabilityDto { available },
    }))
}

/* ============================================================
   Writes
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    Json(req): Json<AppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentDto>>), ApiError> {
    let detail = state.appointments.create(req.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: AppointmentDto::from_detail(detail, &state.clinic_time),
        }),
    ))
}

pub async fn put_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
    Json(req): Json<AppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let detail = state
        .appointments
        .replace(appointment_id, req.into())
        .await?;
    Ok(Json(ApiOk {
        data: AppointmentDto::from_detail(detail, &state.clinic_time),
    }))
}

pub async fn patch_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
    Json(req): Json<AppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let detail = state.appointments.update(appointment_id, req.into()).await?;
    Ok(Json(ApiOk {
        data: AppointmentDto::from_detail(detail, &state.clinic_time),
    }))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<OkResponse>, ApiError> {
    state.appointments.delete(appointment_id).await?;
    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
