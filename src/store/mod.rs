//! Persistence contracts, one repository per entity.
//!
//! Appointment mutation only happens through a [`BookingScope`], the atomic
//! unit the booking coordinator checks and writes in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Appointment, AppointmentDetail, Dentist, NewAppointment, NewDentist, NewPatient, Patient,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("record is still referenced: {0}")]
    ForeignKeyViolation(String),
    /// Lock wait expired, deadlock victim or serialization failure. Safe to retry.
    #[error("storage contention: {0}")]
    Contention(String),
    #[error("db error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            let message = db.message().to_string();
            match db.code().as_deref() {
                Some("23505") => return StoreError::UniqueViolation(message),
                Some("23503") => return StoreError::ForeignKeyViolation(message),
                Some("55P03") | Some("40001") | Some("40P01") => {
                    return StoreError::Contention(message);
                }
                _ => {}
            }
        }
        if matches!(e, sqlx::Error::PoolTimedOut) {
            return StoreError::Contention("connection pool exhausted".into());
        }
        StoreError::Database(e)
    }
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<AppointmentDetail>, StoreError>;

    async fn list_all(&self) -> Result<Vec<AppointmentDetail>, StoreError>;

    async fn list_by_dentist(&self, license: &str) -> Result<Vec<AppointmentDetail>, StoreError>;

    async fn list_by_patient(&self, identity: &str)
    -> Result<Vec<AppointmentDetail>, StoreError>;

    /// Appointments whose start lies in `[from, to)`.
    async fn list_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Opens an atomic check-then-write scope serialized on `keys`.
    ///
    /// Dropping the scope without calling [`BookingScope::commit`] discards
    /// every write made through it.
    async fn begin_booking(&self, keys: &[String]) -> Result<Box<dyn BookingScope>, StoreError>;
}

#[async_trait]
pub trait BookingScope: Send {
    async fn find(&mut self, id: i64) -> Result<Option<Appointment>, StoreError>;

    async fn find_detail(&mut self, id: i64) -> Result<Option<AppointmentDetail>, StoreError>;

    async fn dentist_exists(&mut self, license: &str) -> Result<bool, StoreError>;

    async fn patient_exists(&mut self, identity: &str) -> Result<bool, StoreError>;

    async fn appointments_starting_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert(&mut self, appointment: &NewAppointment) -> Result<i64, StoreError>;

    /// Returns `false` when no row has this id.
    async fn update(&mut self, id: i64, appointment: &NewAppointment) -> Result<bool, StoreError>;

    /// Returns `false` when no row has this id.
    async fn delete(&mut self, id: i64) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DentistRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Dentist>, StoreError>;

    async fn find_by_license(&self, license: &str) -> Result<Option<Dentist>, StoreError>;

    async fn list_all(&self) -> Result<Vec<Dentist>, StoreError>;

    async fn insert(&self, dentist: &NewDentist) -> Result<Dentist, StoreError>;

    async fn update(&self, id: i64, dentist: &NewDentist) -> Result<Option<Dentist>, StoreError>;

    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PatientRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Patient>, StoreError>;

    async fn find_by_identity(&self, identity: &str) -> Result<Option<Patient>, StoreError>;

    async fn list_all(&self) -> Result<Vec<Patient>, StoreError>;

    async fn insert(&self, patient: &NewPatient) -> Result<Patient, StoreError>;

    /// `registered_at` is never rewritten by an update.
    async fn update(&self, id: i64, patient: &NewPatient) -> Result<Option<Patient>, StoreError>;

    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}
