//! Seeded in-memory clinic shared by the service and route tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tokio::sync::Notify;

use super::events::{EventSink, RecordingSink};
use super::locks::LockTable;
use super::window::ClinicTime;
use super::ServiceSettings;
use crate::clock::FixedClock;
use crate::models::{
    AppState, Appointment, AppointmentDetail, Dentist, NewDentist, NewPatient, Patient,
};
use crate::store::{
    AppointmentRepository, BookingScope, DentistRepository, MemoryStore, PatientRepository,
    StoreError,
};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub locks: Arc<LockTable>,
    pub clinic: ClinicTime,
    pub events: Arc<RecordingSink>,
    pub state: AppState,
}

impl Fixture {
    /// Another service graph over the same store and clock, publishing to `events`.
    pub fn state_with_sink(&self, events: Arc<dyn EventSink>) -> AppState {
        AppState::assemble(self.store.clone(), self.clock.clone(), events, self.settings())
    }

    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            commit_timeout: Duration::from_secs(2),
            clinic_time: self.clinic,
        }
    }
}

/// Dentists CRO1 and CRO2, patients RG1 to RG3, clock at 01/05/2030 09:00 clinic time.
pub async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let now = Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(now));
    let clinic = ClinicTime::new(FixedOffset::west_opt(3 * 3600).unwrap());

    for (license, last_name) in [("CRO1", "Souza"), ("CRO2", "Pereira")] {
        DentistRepository::insert(
            store.as_ref(),
            &NewDentist {
                last_name: last_name.into(),
                first_name: "Ana".into(),
                license: license.into(),
            },
        )
        .await
        .unwrap();
    }
    for (identity, last_name) in [("RG1", "Lima"), ("RG2", "Costa"), ("RG3", "Alves")] {
        PatientRepository::insert(
            store.as_ref(),
            &NewPatient {
                last_name: last_name.into(),
                first_name: "Rui".into(),
                identity: identity.into(),
                registered_at: now,
            },
        )
        .await
        .unwrap();
    }

    let events = Arc::new(RecordingSink::default());
    let settings = ServiceSettings {
        commit_timeout: Duration::from_secs(2),
        clinic_time: clinic,
    };
    let state = AppState::assemble(store.clone(), clock.clone(), events.clone(), settings);

    Fixture {
        store,
        clock,
        locks: Arc::new(LockTable::default()),
        clinic,
        events,
        state,
    }
}

pub fn start(f: &Fixture, raw: &str) -> DateTime<Utc> {
    f.clinic.parse(raw).unwrap()
}

pub async fn stored(f: &Fixture) -> Vec<AppointmentDetail> {
    AppointmentRepository::list_all(f.store.as_ref()).await.unwrap()
}

/// Holds the first `find_by_id` after it has read, until released.
#[derive(Debug, Default)]
pub struct ReadGate {
    armed: AtomicBool,
    reached: Notify,
    released: Notify,
}

impl ReadGate {
    /// Resolves once the held read has its (now stale) row.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.released.notified().await;
        }
    }
}

/// The fixture store behind a [`ReadGate`] on record lookups.
pub struct GatedStore {
    inner: Arc<MemoryStore>,
    pub gate: ReadGate,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        let gate = ReadGate::default();
        gate.armed.store(true, Ordering::SeqCst);
        Arc::new(Self { inner, gate })
    }
}

#[async_trait]
impl AppointmentRepository for GatedStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<AppointmentDetail>, StoreError> {
        let row = AppointmentRepository::find_by_id(self.inner.as_ref(), id).await;
        self.gate.pass().await;
        row
    }

    async fn list_all(&self) -> Result<Vec<AppointmentDetail>, StoreError> {
        AppointmentRepository::list_all(self.inner.as_ref()).await
    }

    async fn list_by_dentist(&self, license: &str) -> Result<Vec<AppointmentDetail>, StoreError> {
        self.inner.list_by_dentist(license).await
    }

    async fn list_by_patient(
        &self,
        identity: &str,
    ) -> Result<Vec<AppointmentDetail>, StoreError> {
        self.inner.list_by_patient(identity).await
    }

    async fn list_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.list_starting_between(from, to).await
    }

    async fn begin_booking(&self, keys: &[String]) -> Result<Box<dyn BookingScope>, StoreError> {
        self.inner.begin_booking(keys).await
    }
}

#[async_trait]
impl DentistRepository for GatedStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Dentist>, StoreError> {
        let row = DentistRepository::find_by_id(self.inner.as_ref(), id).await;
        self.gate.pass().await;
        row
    }

    async fn find_by_license(&self, license: &str) -> Result<Option<Dentist>, StoreError> {
        self.inner.find_by_license(license).await
    }

    async fn list_all(&self) -> Result<Vec<Dentist>, StoreError> {
        DentistRepository::list_all(self.inner.as_ref()).await
    }

    async fn insert(&self, dentist: &NewDentist) -> Result<Dentist, StoreError> {
        DentistRepository::insert(self.inner.as_ref(), dentist).await
    }

    async fn update(&self, id: i64, dentist: &NewDentist) -> Result<Option<Dentist>, StoreError> {
        DentistRepository::update(self.inner.as_ref(), id, dentist).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        DentistRepository::delete(self.inner.as_ref(), id).await
    }
}

#[async_trait]
impl PatientRepository for GatedStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Patient>, StoreError> {
        let row = PatientRepository::find_by_id(self.inner.as_ref(), id).await;
        self.gate.pass().await;
        row
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<Patient>, StoreError> {
        self.inner.find_by_identity(identity).await
    }

    async fn list_all(&self) -> Result<Vec<Patient>, StoreError> {
        PatientRepository::list_all(self.inner.as_ref()).await
    }

    async fn insert(&self, patient: &NewPatient) -> Result<Patient, StoreError> {
        PatientRepository::insert(self.inner.as_ref(), patient).await
    }

    async fn update(&self, id: i64, patient: &NewPatient) -> Result<Option<Patient>, StoreError> {
        PatientRepository::update(self.inner.as_ref(), id, patient).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        PatientRepository::delete(self.inner.as_ref(), id).await
    }
}
