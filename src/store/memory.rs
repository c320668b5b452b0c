//! Process-local backend. Mirrors the PostgreSQL constraints (unique
//! identifiers, restricted deletes) so services behave identically on both.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    AppointmentRepository, BookingScope, DentistRepository, PatientRepository, StoreError,
};
use crate::models::{
    Appointment, AppointmentDetail, Dentist, NewAppointment, NewDentist, NewPatient, Patient,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    appointments: BTreeMap<i64, Appointment>,
    dentists: BTreeMap<i64, Dentist>,
    patients: BTreeMap<i64, Patient>,
    last_appointment_id: i64,
    last_dentist_id: i64,
    last_patient_id: i64,
}

impl MemoryState {
    fn dentist_by_license(&self, license: &str) -> Option<&Dentist> {
        self.dentists.values().find(|d| d.license == license)
    }

    fn patient_by_identity(&self, identity: &str) -> Option<&Patient> {
        self.patients.values().find(|p| p.identity == identity)
    }

    fn detail(&self, appointment: &Appointment) -> Option<AppointmentDetail> {
        // inner join semantics
        let dentist = self.dentist_by_license(&appointment.dentist_license)?;
        let patient = self.patient_by_identity(&appointment.patient_identity)?;
        Some(AppointmentDetail {
            appointment: appointment.clone(),
            dentist: dentist.clone(),
            patient: patient.clone(),
        })
    }

    fn details_where(&self, keep: impl Fn(&Appointment) -> bool) -> Vec<AppointmentDetail> {
        let mut rows: Vec<AppointmentDetail> = self
            .appointments
            .values()
            .filter(|a| keep(a))
            .filter_map(|a| self.detail(a))
            .collect();
        rows.sort_by(|a, b| {
            (a.appointment.start_at, a.appointment.id).cmp(&(b.appointment.start_at, b.appointment.id))
        });
        rows
    }

    fn starting_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Appointment> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .values()
            .filter(|a| a.start_at >= from && a.start_at < to)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.start_at, a.id));
        rows
    }

    fn check_participants(&self, appointment: &NewAppointment) -> Result<(), StoreError> {
        if self.dentist_by_license(&appointment.dentist_license).is_none() {
            return Err(StoreError::ForeignKeyViolation(format!(
                "dentist license {} does not exist",
                appointment.dentist_license
            )));
        }
        if self.patient_by_identity(&appointment.patient_identity).is_none() {
            return Err(StoreError::ForeignKeyViolation(format!(
                "patient identity {} does not exist",
                appointment.patient_identity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<AppointmentDetail>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.appointments.get(&id).and_then(|a| state.detail(a)))
    }

    async fn list_all(&self) -> Result<Vec<AppointmentDetail>, StoreError> {
        Ok(self.state.lock().await.details_where(|_| true))
    }

    async fn list_by_dentist(&self, license: &str) -> Result<Vec<AppointmentDetail>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .details_where(|a| a.dentist_license == license))
    }

    async fn list_by_patient(
        &self,
        identity: &str,
    ) -> Result<Vec<AppointmentDetail>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .details_where(|a| a.patient_identity == identity))
    }

    async fn list_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.state.lock().await.starting_between(from, to))
    }

    async fn begin_booking(&self, _keys: &[String]) -> Result<Box<dyn BookingScope>, StoreError> {
        // The whole state is the serialization point here; keys only matter
        // for backends that can lock at a finer grain.
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryScope { guard, working }))
    }
}

/// Writes go to a working copy that replaces the shared state on commit.
struct MemoryScope {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl BookingScope for MemoryScope {
    async fn find(&mut self, id: i64) -> Result<Option<Appointment>, StoreError> {
        Ok(self.working.appointments.get(&id).cloned())
    }

    async fn find_detail(&mut self, id: i64) -> Result<Option<AppointmentDetail>, StoreError> {
        Ok(self
            .working
            .appointments
            .get(&id)
            .and_then(|a| self.working.detail(a)))
    }

    async fn dentist_exists(&mut self, license: &str) -> Result<bool, StoreError> {
        Ok(self.working.dentist_by_license(license).is_some())
    }

    async fn patient_exists(&mut self, identity: &str) -> Result<bool, StoreError> {
        Ok(self.working.patient_by_identity(identity).is_some())
    }

    async fn appointments_starting_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.working.starting_between(from, to))
    }

    async fn insert(&mut self, appointment: &NewAppointment) -> Result<i64, StoreError> {
        self.working.check_participants(appointment)?;
        self.working.last_appointment_id += 1;
        let id = self.working.last_appointment_id;
        self.working.appointments.insert(
            id,
            Appointment {
                id,
                description: appointment.description.clone(),
                start_at: appointment.start_at,
                dentist_license: appointment.dentist_license.clone(),
                patient_identity: appointment.patient_identity.clone(),
            },
        );
        Ok(id)
    }

    async fn update(&mut self, id: i64, appointment: &NewAppointment) -> Result<bool, StoreError> {
        self.working.check_participants(appointment)?;
        let Some(row) = self.working.appointments.get_mut(&id) else {
            return Ok(false);
        };
        row.description = appointment.description.clone();
        row.start_at = appointment.start_at;
        row.dentist_license = appointment.dentist_license.clone();
        row.patient_identity = appointment.patient_identity.clone();
        Ok(true)
    }

    async fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        Ok(self.working.appointments.remove(&id).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryScope { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl DentistRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Dentist>, StoreError> {
        Ok(self.state.lock().await.dentists.get(&id).cloned())
    }

    async fn find_by_license(&self, license: &str) -> Result<Option<Dentist>, StoreError> {
        Ok(self.state.lock().await.dentist_by_license(license).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Dentist>, StoreError> {
        Ok(self.state.lock().await.dentists.values().cloned().collect())
    }

    async fn insert(&self, dentist: &NewDentist) -> Result<Dentist, StoreError> {
        let mut state = self.state.lock().await;
        if state.dentist_by_license(&dentist.license).is_some() {
            return Err(StoreError::UniqueViolation(format!(
                "dentist license {} already exists",
                dentist.license
            )));
        }
        state.last_dentist_id += 1;
        let row = Dentist {
            id: state.last_dentist_id,
            last_name: dentist.last_name.clone(),
            first_name: dentist.first_name.clone(),
            license: dentist.license.clone(),
        };
        state.dentists.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, id: i64, dentist: &NewDentist) -> Result<Option<Dentist>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(current) = state.dentists.get(&id).cloned() else {
            return Ok(None);
        };
        if current.license != dentist.license {
            if state.dentist_by_license(&dentist.license).is_some() {
                return Err(StoreError::UniqueViolation(format!(
                    "dentist license {} already exists",
                    dentist.license
                )));
            }
            if state
                .appointments
                .values()
                .any(|a| a.dentist_license == current.license)
            {
                return Err(StoreError::ForeignKeyViolation(format!(
                    "dentist license {} is referenced by appointments",
                    current.license
                )));
            }
        }
        let row = Dentist {
            id,
            last_name: dentist.last_name.clone(),
            first_name: dentist.first_name.clone(),
            license: dentist.license.clone(),
        };
        state.dentists.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(current) = state.dentists.get(&id) else {
            return Ok(false);
        };
        if state
            .appointments
            .values()
            .any(|a| a.dentist_license == current.license)
        {
            return Err(StoreError::ForeignKeyViolation(format!(
                "dentist license {} is referenced by appointments",
                current.license
            )));
        }
        state.dentists.remove(&id);
        Ok(true)
    }
}

#[async_trait]
impl PatientRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Patient>, StoreError> {
        Ok(self.state.lock().await.patients.get(&id).cloned())
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<Patient>, StoreError> {
        Ok(self.state.lock().await.patient_by_identity(identity).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Patient>, StoreError> {
        Ok(self.state.lock().await.patients.values().cloned().collect())
    }

    async fn insert(&self, patient: &NewPatient) -> Result<Patient, StoreError> {
        let mut state = self.state.lock().await;
        if state.patient_by_identity(&patient.identity).is_some() {
            return Err(StoreError::UniqueViolation(format!(
                "patient identity {} already exists",
                patient.identity
            )));
        }
        state.last_patient_id += 1;
        let row = Patient {
            id: state.last_patient_id,
            last_name: patient.last_name.clone(),
            first_name: patient.first_name.clone(),
            identity: patient.identity.clone(),
            registered_at: patient.registered_at,
        };
        state.patients.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, id: i64, patient: &NewPatient) -> Result<Option<Patient>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(current) = state.patients.get(&id).cloned() else {
            return Ok(None);
        };
        if current.identity != patient.identity {
            if state.patient_by_identity(&patient.identity).is_some() {
                return Err(StoreError::UniqueViolation(format!(
                    "patient identity {} already exists",
                    patient.identity
                )));
            }
            if state
                .appointments
                .values()
                .any(|a| a.patient_identity == current.identity)
            {
                return Err(StoreError::ForeignKeyViolation(format!(
                    "patient identity {} is referenced by appointments",
                    current.identity
                )));
            }
        }
        let row = Patient {
            id,
            last_name: patient.last_name.clone(),
            first_name: patient.first_name.clone(),
            identity: patient.identity.clone(),
            registered_at: current.registered_at,
        };
        state.patients.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(current) = state.patients.get(&id) else {
            return Ok(false);
        };
        if state
            .appointments
            .values()
            .any(|a| a.patient_identity == current.identity)
        {
            return Err(StoreError::ForeignKeyViolation(format!(
                "patient identity {} is referenced by appointments",
                current.identity
            )));
        }
        state.patients.remove(&id);
        Ok(true)
    }
}
