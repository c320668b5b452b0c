use std::sync::Arc;

use tracing::warn;

use super::availability::AvailabilityIndex;
use super::coordinator::{AppointmentChanges, BookingCoordinator, Proposal};
use super::events::{AppointmentEvent, AppointmentEventKind, EventSink};
use super::fields::{non_empty, required};
use super::window::{ensure_lead_time, ClinicTime, TimeWindow};
use super::ServiceError;
use crate::clock::Clock;
use crate::models::{AppointmentDetail, NewAppointment};
use crate::store::AppointmentRepository;

/// Caller-supplied appointment fields. `None` and blank strings mean "not given".
#[derive(Debug, Clone, Default)]
pub struct AppointmentFields {
    pub description: Option<String>,
    pub date_and_time: Option<String>,
    pub dentist_license: Option<String>,
    pub patient_identity: Option<String>,
}

pub struct AppointmentService {
    repo: Arc<dyn AppointmentRepository>,
    availability: AvailabilityIndex,
    coordinator: BookingCoordinator,
    clock: Arc<dyn Clock>,
    clinic_time: ClinicTime,
    events: Arc<dyn EventSink>,
}

impl AppointmentService {
    pub fn new(
        repo: Arc<dyn AppointmentRepository>,
        availability: AvailabilityIndex,
        coordinator: BookingCoordinator,
        clock: Arc<dyn Clock>,
        clinic_time: ClinicTime,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repo,
            availability,
            coordinator,
            clock,
            clinic_time,
            events,
        }
    }

    pub async fn create(&self, fields: AppointmentFields) -> Result<AppointmentDetail, ServiceError> {
        let description = required("description", fields.description.as_deref())?;
        let raw_start = required("dateAndTime", fields.date_and_time.as_deref())?;
        let dentist_license = required("dentistLicense", fields.dentist_license.as_deref())?;
        let patient_identity = required("patientIdentity", fields.patient_identity.as_deref())?;

        let next = NewAppointment {
            description,
            start_at: self.clinic_time.parse(&raw_start)?,
            dentist_license,
            patient_identity,
        };
        ensure_lead_time(&next.window(), self.clock.now())?;

        let detail = self
            .coordinator
            .commit(Proposal::create(next), ensure_complete)
            .await?;
        self.emit(AppointmentEventKind::Created, &detail);
        Ok(detail)
    }

    /// Partial update: blank or missing fields keep their stored value.
    ///
    /// The merge happens against the row as stored at commit time. Lead time
    /// is only re-checked when the start moves, conflicts when the start or
    /// either participant changes.
    pub async fn update(
        &self,
        id: i64,
        fields: AppointmentFields,
    ) -> Result<AppointmentDetail, ServiceError> {
        let seen = self.get(id).await?.appointment;

        let changes = AppointmentChanges {
            description: non_empty(fields.description.as_deref()).map(str::to_string),
            start_at: non_empty(fields.date_and_time.as_deref())
                .map(|raw| self.clinic_time.parse(raw))
                .transpose()?,
            dentist_license: non_empty(fields.dentist_license.as_deref()).map(str::to_string),
            patient_identity: non_empty(fields.patient_identity.as_deref()).map(str::to_string),
        };

        let detail = self
            .coordinator
            .commit(Proposal::update(seen, changes), ensure_complete)
            .await?;
        self.emit(AppointmentEventKind::Updated, &detail);
        Ok(detail)
    }

    /// Full update: every field is required.
    pub async fn replace(
        &self,
        id: i64,
        fields: AppointmentFields,
    ) -> Result<AppointmentDetail, ServiceError> {
        let full = AppointmentFields {
            description: Some(required("description", fields.description.as_deref())?),
            date_and_time: Some(required("dateAndTime", fields.date_and_time.as_deref())?),
            dentist_license: Some(required(
                "dentistLicense",
                fields.dentist_license.as_deref(),
            )?),
            patient_identity: Some(required(
                "patientIdentity",
                fields.patient_identity.as_deref(),
            )?),
        };
        self.update(id, full).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        self.coordinator.remove(id).await
    }

    pub async fn get(&self, id: i64) -> Result<AppointmentDetail, ServiceError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("appointment {id}")))
    }

    pub async fn list_all(&self) -> Result<Vec<AppointmentDetail>, ServiceError> {
        Ok(self.repo.list_all().await?)
    }

    pub async fn list_by_patient(
        &self,
        identity: &str,
    ) -> Result<Vec<AppointmentDetail>, ServiceError> {
        Ok(self.repo.list_by_patient(identity).await?)
    }

    pub async fn list_by_dentist(
        &self,
        license: &str,
    ) -> Result<Vec<AppointmentDetail>, ServiceError> {
        Ok(self.repo.list_by_dentist(license).await?)
    }

    /// Whether the slot is free for both participants right now. Advisory only.
    pub async fn is_available(
        &self,
        date_and_time: Option<&str>,
        dentist_license: Option<&str>,
        patient_identity: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let start_at = self
            .clinic_time
            .parse(&required("dateAndTime", date_and_time)?)?;
        let dentist_license = required("dentistLicense", dentist_license)?;
        let patient_identity = required("patientIdentity", patient_identity)?;

        self.availability
            .is_available(
                &TimeWindow::starting_at(start_at),
                &dentist_license,
                &patient_identity,
                None,
            )
            .await
    }

    fn emit(&self, kind: AppointmentEventKind, detail: &AppointmentDetail) {
        let event = AppointmentEvent {
            kind,
            occurred_at: self.clock.now(),
            appointment: detail.clone(),
        };
        if let Err(e) = self.events.publish(&event) {
            warn!(
                error = %e,
                appointment_id = detail.appointment.id,
                ?kind,
                "appointment event not published"
            );
        }
    }
}

fn ensure_complete(next: &NewAppointment) -> Result<(), ServiceError> {
    for (name, value) in [
        ("description", &next.description),
        ("dentistLicense", &next.dentist_license),
        ("patientIdentity", &next.patient_identity),
    ] {
        if value.trim().is_empty() {
            return Err(ServiceError::Validation(format!("{name} is required")));
        }
    }
    Ok(())
}
