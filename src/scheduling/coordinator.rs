//! Atomic check-then-write for appointment mutations.
//!
//! A commit holds the in-process locks for every dentist/patient it touches
//! and the store's booking scope (a transaction holding advisory locks on
//! PostgreSQL) while it re-validates and writes. Concurrent bookings for an
//! overlapping window therefore cannot both observe "available".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::availability::{describe_conflict, find_conflict};
use super::locks::{dentist_key, key_set, patient_key, KeyGuard, LockTable, RELOCK_ATTEMPTS};
use super::window::ensure_lead_time;
use super::ServiceError;
use crate::clock::Clock;
use crate::models::{Appointment, AppointmentDetail, NewAppointment};
use crate::store::{AppointmentRepository, BookingScope, StoreError};

/// Fields an update sets. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct AppointmentChanges {
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub dentist_license: Option<String>,
    pub patient_identity: Option<String>,
}

impl AppointmentChanges {
    pub fn applied_to(&self, stored: &Appointment) -> NewAppointment {
        NewAppointment {
            description: self
                .description
                .clone()
                .unwrap_or_else(|| stored.description.clone()),
            start_at: self.start_at.unwrap_or(stored.start_at),
            dentist_license: self
                .dentist_license
                .clone()
                .unwrap_or_else(|| stored.dentist_license.clone()),
            patient_identity: self
                .patient_identity
                .clone()
                .unwrap_or_else(|| stored.patient_identity.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum Change {
    Create(NewAppointment),
    /// `seen` is the row as read before locking; `changes` are merged into
    /// the row found inside the scope.
    Update {
        seen: Appointment,
        changes: AppointmentChanges,
    },
}

/// A pending appointment write.
#[derive(Debug, Clone)]
pub struct Proposal {
    change: Change,
}

impl Proposal {
    pub fn create(appointment: NewAppointment) -> Self {
        Self {
            change: Change::Create(appointment),
        }
    }

    pub fn update(seen: Appointment, changes: AppointmentChanges) -> Self {
        Self {
            change: Change::Update { seen, changes },
        }
    }

    fn target_id(&self) -> Option<i64> {
        match &self.change {
            Change::Create(_) => None,
            Change::Update { seen, .. } => Some(seen.id),
        }
    }

    /// The appointment to write, given the row currently stored.
    fn resolve(&self, stored: Option<&Appointment>) -> NewAppointment {
        match &self.change {
            Change::Create(appointment) => appointment.clone(),
            Change::Update { seen, changes } => changes.applied_to(stored.unwrap_or(seen)),
        }
    }

    /// Participants of the resulting appointment plus, on update, those it
    /// moves away from.
    fn keys_against(&self, stored: Option<&Appointment>) -> Vec<String> {
        let next = self.resolve(stored);
        let mut keys = vec![
            dentist_key(&next.dentist_license),
            patient_key(&next.patient_identity),
        ];
        if let Some(current) = stored {
            keys.push(dentist_key(&current.dentist_license));
            keys.push(patient_key(&current.patient_identity));
        }
        key_set(keys)
    }

    fn initial_keys(&self) -> Vec<String> {
        match &self.change {
            Change::Create(_) => self.keys_against(None),
            Change::Update { seen, .. } => self.keys_against(Some(seen)),
        }
    }
}

pub struct BookingCoordinator {
    repo: Arc<dyn AppointmentRepository>,
    clock: Arc<dyn Clock>,
    locks: Arc<LockTable>,
    commit_timeout: Duration,
}

impl BookingCoordinator {
    pub fn new(
        repo: Arc<dyn AppointmentRepository>,
        clock: Arc<dyn Clock>,
        locks: Arc<LockTable>,
        commit_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            clock,
            locks,
            commit_timeout,
        }
    }

    /// Validates and writes `proposal` inside one serialized scope.
    ///
    /// An update is merged into the row read inside the scope, so changes
    /// committed by others since the caller's read survive. `validate` runs
    /// first on the merged appointment. Lead time is re-checked against the
    /// clock whenever the window is new or moved, participants and conflicts
    /// whenever window or participants differ from the stored row. Any error
    /// leaves the store untouched.
    pub async fn commit<F>(
        &self,
        proposal: Proposal,
        validate: F,
    ) -> Result<AppointmentDetail, ServiceError>
    where
        F: FnOnce(&NewAppointment) -> Result<(), ServiceError> + Send,
    {
        let (_guard, mut scope, stored) = self.enter_covering(&proposal).await?;
        let target = proposal.target_id();
        let next = &proposal.resolve(stored.as_ref());

        validate(next)?;

        let window = next.window();
        let window_changed = stored.as_ref().is_none_or(|s| s.start_at != next.start_at);
        let participants_changed = stored.as_ref().is_none_or(|s| {
            s.dentist_license != next.dentist_license || s.patient_identity != next.patient_identity
        });

        if window_changed {
            ensure_lead_time(&window, self.clock.now())?;
        }

        if participants_changed {
            if !scope.dentist_exists(&next.dentist_license).await? {
                return Err(ServiceError::NotFound(format!(
                    "dentist with license {}",
                    next.dentist_license
                )));
            }
            if !scope.patient_exists(&next.patient_identity).await? {
                return Err(ServiceError::NotFound(format!(
                    "patient with identity {}",
                    next.patient_identity
                )));
            }
        }

        if window_changed || participants_changed {
            let (from, to) = window.candidate_range();
            let candidates = scope.appointments_starting_between(from, to).await?;
            if let Some(existing) = find_conflict(
                &window,
                &next.dentist_license,
                &next.patient_identity,
                target,
                &candidates,
            ) {
                warn!(
                    conflicting_id = existing.id,
                    dentist = %next.dentist_license,
                    patient = %next.patient_identity,
                    start_at = %next.start_at,
                    "booking rejected at commit"
                );
                return Err(ServiceError::Conflict(describe_conflict(
                    existing,
                    &next.dentist_license,
                )));
            }
        }

        let id = match target {
            Some(id) => {
                if !scope.update(id, next).await? {
                    return Err(ServiceError::NotFound(format!("appointment {id}")));
                }
                id
            }
            None => scope.insert(next).await?,
        };

        let detail = scope.find_detail(id).await?.ok_or_else(|| {
            ServiceError::Persistence(format!("appointment {id} vanished before commit"))
        })?;
        scope.commit().await?;

        info!(
            appointment_id = id,
            dentist = %next.dentist_license,
            patient = %next.patient_identity,
            start_at = %next.start_at,
            updated = target.is_some(),
            "appointment committed"
        );
        Ok(detail)
    }

    /// Deletes an appointment under the same serialization as writes.
    pub async fn remove(&self, id: i64) -> Result<(), ServiceError> {
        let current = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("appointment {id}")))?
            .appointment;

        let keys = key_set([
            dentist_key(&current.dentist_license),
            patient_key(&current.patient_identity),
        ]);
        let (_guard, mut scope) = self.enter(&keys).await?;

        if !scope.delete(id).await? {
            return Err(ServiceError::NotFound(format!("appointment {id}")));
        }
        scope.commit().await?;

        info!(appointment_id = id, "appointment removed");
        Ok(())
    }

    /// Enters a scope whose keys cover both the stored row and the merged
    /// result. Re-enters with a wider key set when the row changed
    /// participants between the caller's read and the lock.
    async fn enter_covering(
        &self,
        proposal: &Proposal,
    ) -> Result<(KeyGuard, Box<dyn BookingScope>, Option<Appointment>), ServiceError> {
        let mut keys = proposal.initial_keys();
        for _ in 0..RELOCK_ATTEMPTS {
            let (guard, mut scope) = self.enter(&keys).await?;
            let stored = match proposal.target_id() {
                Some(id) => Some(
                    scope
                        .find(id)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound(format!("appointment {id}")))?,
                ),
                None => None,
            };

            let needed = proposal.keys_against(stored.as_ref());
            if needed.iter().all(|key| keys.contains(key)) {
                return Ok((guard, scope, stored));
            }
            debug!(?keys, ?needed, "appointment participants moved before lock, re-entering");
            keys = key_set(keys.into_iter().chain(needed));
        }

        warn!(?keys, "appointment kept moving between reads");
        Err(ServiceError::Transient(
            "the appointment is being edited, please try again".into(),
        ))
    }

    /// Takes the keyed locks and opens the store scope, bounded by `commit_timeout`.
    async fn enter(
        &self,
        keys: &[String],
    ) -> Result<(KeyGuard, Box<dyn BookingScope>), ServiceError> {
        let acquire = async {
            let guard = self.locks.acquire(keys).await;
            let scope = self.repo.begin_booking(keys).await?;
            Ok::<_, StoreError>((guard, scope))
        };

        match tokio::time::timeout(self.commit_timeout, acquire).await {
            Ok(entered) => Ok(entered?),
            Err(_) => {
                warn!(?keys, timeout = ?self.commit_timeout, "commit scope not acquired in time");
                Err(ServiceError::Transient(
                    "the schedule is busy, please try again".into(),
                ))
            }
        }
    }
}
