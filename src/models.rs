use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::clock::Clock;
use crate::scheduling::{
    appointments::AppointmentService,
    availability::AvailabilityIndex,
    coordinator::BookingCoordinator,
    dentists::DentistService,
    events::EventSink,
    identity::IdentityRegistry,
    locks::LockTable,
    patients::PatientService,
    window::{ClinicTime, TimeWindow},
    ServiceSettings,
};
use crate::store::{AppointmentRepository, DentistRepository, PatientRepository};

#[derive(Clone)]
pub struct AppState {
    pub appointments: Arc<AppointmentService>,
    pub dentists: Arc<DentistService>,
    pub patients: Arc<PatientService>,
    pub clinic_time: ClinicTime,
}

impl AppState {
    /// Wires every service on top of a single backend implementing all three repositories.
    pub fn assemble<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        settings: ServiceSettings,
    ) -> Self
    where
        S: AppointmentRepository + DentistRepository + PatientRepository + 'static,
    {
        let appointment_repo: Arc<dyn AppointmentRepository> = store.clone();
        let dentist_repo: Arc<dyn DentistRepository> = store.clone();
        let patient_repo: Arc<dyn PatientRepository> = store;

        let locks = Arc::new(LockTable::default());
        let registry = Arc::new(IdentityRegistry::new(
            dentist_repo.clone(),
            patient_repo.clone(),
        ));
        let coordinator = BookingCoordinator::new(
            appointment_repo.clone(),
            clock.clone(),
            locks.clone(),
            settings.commit_timeout,
        );

        let appointments = AppointmentService::new(
            appointment_repo.clone(),
            AvailabilityIndex::new(appointment_repo.clone()),
            coordinator,
            clock.clone(),
            settings.clinic_time,
            events,
        );
        let dentists = DentistService::new(
            dentist_repo,
            appointment_repo.clone(),
            registry.clone(),
            locks.clone(),
            settings.commit_timeout,
        );
        let patients = PatientService::new(
            patient_repo,
            appointment_repo,
            registry,
            locks,
            clock,
            settings.commit_timeout,
        );

        Self {
            appointments: Arc::new(appointments),
            dentists: Arc::new(dentists),
            patients: Arc::new(patients),
            clinic_time: settings.clinic_time,
        }
    }
}

/* -------------------------
   Domain rows
--------------------------*/

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: i64,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub dentist_license: String,
    pub patient_identity: String,
}

impl Appointment {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::starting_at(self.start_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Dentist {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub license: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub identity: String,
    pub registered_at: DateTime<Utc>,
}

/// An appointment joined with the dentist and patient it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetail {
    pub appointment: Appointment,
    pub dentist: Dentist,
    pub patient: Patient,
}

/* -------------------------
   Write models
--------------------------*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub dentist_license: String,
    pub patient_identity: String,
}

impl NewAppointment {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::starting_at(self.start_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDentist {
    pub last_name: String,
    pub first_name: String,
    pub license: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPatient {
    pub last_name: String,
    pub first_name: String,
    pub identity: String,
    pub registered_at: DateTime<Utc>,
}
