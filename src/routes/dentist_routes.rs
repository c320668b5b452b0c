// src/routes/dentist_routes.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    models::{AppState, Dentist},
    routes::{ApiOk, OkData, OkResponse},
    scheduling::dentists::DentistFields,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dentists", get(list_dentists).post(create_dentist))
        .route(
            "/dentists/{dentist_id}",
            get(get_dentist)
                .put(put_dentist)
                .patch(patch_dentist)
                .delete(delete_dentist),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DentistRequest {
    pub last_name: Option<String>,
    #[serde(alias = "name")]
    pub first_name: Option<String>,
    #[serde(alias = "cro")]
    pub license: Option<String>,
}

impl From<DentistRequest> for DentistFields {
    fn from(req: DentistRequest) -> Self {
        DentistFields {
            last_name: req.last_name,
            first_name: req.first_name,
            license: req.license,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DentistDto {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub license: String,
}

impl From<Dentist> for DentistDto {
    fn from(d: Dentist) -> Self {
        DentistDto {
            id: d.id,
            last_name: d.last_name,
            first_name: d.first_name,
            license: d.license,
        }
    }
}

pub async fn list_dentists(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<DentistDto>>>, ApiError> {
    let rows = state.dentists.list_all().await?;
    Ok(Json(ApiOk {
        data: rows.into_iter().map(DentistDto::from).collect(),
    }))
}

pub async fn get_dentist(
    State(state): State<AppState>,
    Path(dentist_id): Path<i64>,
) -> Result<Json<ApiOk<DentistDto>>, ApiError> {
    let dentist = state.dentists.get(dentist_id).await?;
    Ok(Json(ApiOk { data: dentist.into() }))
}

pub async fn create_dentist(
    State(state): State<AppState>,
    Json(req): Json<DentistRequest>,
) -> Result<(StatusCode, Json<ApiOk<DentistDto>>), ApiError> {
    let dentist = state.dentists.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: dentist.into() })))
}

pub async fn put_dentist(
    State(state): State<AppState>,
    Path(dentist_id): Path<i64>,
    Json(req): Json<DentistRequest>,
) -> Result<Json<ApiOk<DentistDto>>, ApiError> {
    let dentist = state.dentists.replace(dentist_id, req.into()).await?;
    Ok(Json(ApiOk { data: dentist.into() }))
}

pub async fn patch_dentist(
    State(state): State<AppState>,
    Path(dentist_id): Path<i64>,
    Json(req): Json<DentistRequest>,
) -> Result<Json<ApiOk<DentistDto>>, ApiError> {
    let dentist = state.dentists.update(dentist_id, req.into()).await?;
    Ok(Json(ApiOk { data: dentist.into() }))
}

pub async fn delete_dentist(
    State(state): State<AppState>,
    Path(dentist_id): Path<i64>,
) -> Result<Json<OkResponse>, ApiError> {
    state.dentists.delete(dentist_id).await?;
    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
