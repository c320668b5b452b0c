use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::fields::{merged, required};
use super::identity::IdentityRegistry;
use super::locks::{key_set, patient_key, KeyGuard, LockTable, RELOCK_ATTEMPTS};
use super::ServiceError;
use crate::clock::Clock;
use crate::models::{NewPatient, Patient};
use crate::store::{AppointmentRepository, PatientRepository};

#[derive(Debug, Clone, Default)]
pub struct PatientFields {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub identity: Option<String>,
}

impl PatientFields {
    fn merged_into(&self, current: &Patient) -> NewPatient {
        NewPatient {
            last_name: merged(&current.last_name, self.last_name.as_deref()),
            first_name: merged(&current.first_name, self.first_name.as_deref()),
            identity: merged(&current.identity, self.identity.as_deref()),
            registered_at: current.registered_at,
        }
    }
}

pub struct PatientService {
    repo: Arc<dyn PatientRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    registry: Arc<IdentityRegistry>,
    locks: Arc<LockTable>,
    clock: Arc<dyn Clock>,
    commit_timeout: Duration,
}

impl PatientService {
    pub fn new(
        repo: Arc<dyn PatientRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        registry: Arc<IdentityRegistry>,
        locks: Arc<LockTable>,
        clock: Arc<dyn Clock>,
        commit_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            appointments,
            registry,
            locks,
            clock,
            commit_timeout,
        }
    }

    /// Registers a patient; `registered_at` is stamped from the clock.
    pub async fn create(&self, fields: PatientFields) -> Result<Patient, ServiceError> {
        let new = NewPatient {
            last_name: required("lastName", fields.last_name.as_deref())?,
            first_name: required("firstName", fields.first_name.as_deref())?,
            identity: required("identity", fields.identity.as_deref())?,
            registered_at: self.clock.now(),
        };

        let _guard = self
            .locks
            .acquire_within(&key_set([patient_key(&new.identity)]), self.commit_timeout)
            .await?;
        self.registry
            .ensure_identity_unique(&new.identity, None)
            .await?;
        let patient = self.repo.insert(&new).await?;

        info!(patient_id = patient.id, identity = %patient.identity, "patient registered");
        Ok(patient)
    }

    pub async fn get(&self, id: i64) -> Result<Patient, ServiceError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("patient {id}")))
    }

    pub async fn list_all(&self) -> Result<Vec<Patient>, ServiceError> {
        Ok(self.repo.list_all().await?)
    }

    pub async fn update(&self, id: i64, fields: PatientFields) -> Result<Patient, ServiceError> {
        let (_guard, current) = self
            .lock_fresh(id, |p| vec![patient_key(&fields.merged_into(p).identity)])
            .await?;
        let next = fields.merged_into(&current);

        if next.identity != current.identity {
            self.registry
                .ensure_identity_unique(&next.identity, Some(id))
                .await?;
            let booked = self.appointments.list_by_patient(&current.identity).await?;
            if !booked.is_empty() {
                return Err(ServiceError::Conflict(format!(
                    "patient {} has appointments and the identity cannot change",
                    current.identity
                )));
            }
        }

        let patient = self
            .repo
            .update(id, &next)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("patient {id}")))?;
        info!(patient_id = id, identity = %patient.identity, "patient updated");
        Ok(patient)
    }

    pub async fn replace(&self, id: i64, fields: PatientFields) -> Result<Patient, ServiceError> {
        let full = PatientFields {
            last_name: Some(required("lastName", fields.last_name.as_deref())?),
            first_name: Some(required("firstName", fields.first_name.as_deref())?),
            identity: Some(required("identity", fields.identity.as_deref())?),
        };
        self.update(id, full).await
    }

    /// Refused while appointments still reference the patient.
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let (_guard, current) = self.lock_fresh(id, |_| Vec::new()).await?;
        let booked = self.appointments.list_by_patient(&current.identity).await?;
        if !booked.is_empty() {
            return Err(ServiceError::Conflict(format!(
                "patient {} has {} appointment(s) and cannot be deleted",
                current.identity,
                booked.len()
            )));
        }

        if !self.repo.delete(id).await? {
            return Err(ServiceError::NotFound(format!("patient {id}")));
        }
        info!(patient_id = id, "patient removed");
        Ok(())
    }

    /// Locks the patient's identity plus `also` and re-reads the row under them.
    async fn lock_fresh<F>(&self, id: i64, also: F) -> Result<(KeyGuard, Patient), ServiceError>
    where
        F: Fn(&Patient) -> Vec<String>,
    {
        let mut seen = self.get(id).await?;
        for _ in 0..RELOCK_ATTEMPTS {
            let keys = key_set(also(&seen).into_iter().chain([patient_key(&seen.identity)]));
            let guard = self.locks.acquire_within(&keys, self.commit_timeout).await?;

            let current = self.get(id).await?;
            if current.identity == seen.identity {
                return Ok((guard, current));
            }
            debug!(patient_id = id, "identity moved before lock");
            seen = current;
        }
        Err(ServiceError::Transient(
            "the patient is being edited, please try again".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::appointments::AppointmentFields;
    use crate::scheduling::test_support::{fixture, GatedStore};
    use chrono::Duration as ChronoDuration;

    fn patient(identity: &str) -> PatientFields {
        PatientFields {
            last_name: Some("Rocha".into()),
            first_name: Some("Lia".into()),
            identity: Some(identity.into()),
        }
    }

    #[tokio::test]
    async fn registration_is_stamped_from_the_clock() {
        let f = fixture().await;
        f.clock.advance(ChronoDuration::days(3));
        let expected = crate::clock::Clock::now(f.clock.as_ref());

        let created = f.state.patients.create(patient("RG7")).await.unwrap();
        assert_eq!(created.registered_at, expected);

        // updates never move the registration time
        f.clock.advance(ChronoDuration::days(1));
        let updated = f
            .state
            .patients
            .update(
                created.id,
                PatientFields {
                    last_name: Some("Reis".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.registered_at, expected);
        assert_eq!(updated.first_name, "Lia");
    }

    #[tokio::test]
    async fn duplicate_identity_is_rejected() {
        let f = fixture().await;
        let err = f.state.patients.create(patient("RG1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateIdentifier(_)));

        let created = f.state.patients.create(patient("RG7")).await.unwrap();
        let err = f
            .state
            .patients
            .update(
                created.id,
                PatientFields {
                    identity: Some("RG2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateIdentifier(_)));
    }

    #[tokio::test]
    async fn concurrent_partial_updates_both_land() {
        let f = fixture().await;
        let created = f.state.patients.create(patient("RG7")).await.unwrap();
        let id = created.id;

        let gated = GatedStore::new(f.store.clone());
        let slow = Arc::new(PatientService::new(
            gated.clone(),
            f.store.clone(),
            Arc::new(IdentityRegistry::new(f.store.clone(), f.store.clone())),
            Arc::new(LockTable::default()),
            f.clock.clone(),
            f.settings().commit_timeout,
        ));

        let rename = tokio::spawn({
            let slow = slow.clone();
            async move {
                slow.update(
                    id,
                    PatientFields {
                        first_name: Some("Bia".into()),
                        ..Default::default()
                    },
                )
                .await
            }
        });
        gated.gate.reached().await;

        f.state
            .patients
            .update(
                id,
                PatientFields {
                    last_name: Some("Reis".into()),
                    identity: Some("RG8".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        gated.gate.release();

        rename.await.unwrap().unwrap();
        let current = f.state.patients.get(id).await.unwrap();
        assert_eq!(current.first_name, "Bia");
        assert_eq!(current.last_name, "Reis");
        assert_eq!(current.identity, "RG8");
        assert_eq!(current.registered_at, created.registered_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_of_one_identity_admit_one() {
        let f = fixture().await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let service = f.state.patients.clone();
            tasks.push(tokio::spawn(async move { service.create(patient("RG7")).await }));
        }

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(ServiceError::DuplicateIdentifier(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn booked_patient_cannot_be_deleted() {
        let f = fixture().await;
        f.state
            .appointments
            .create(AppointmentFields {
                description: Some("cleaning".into()),
                date_and_time: Some("20/05/2030 10:00".into()),
                dentist_license: Some("CRO1".into()),
                patient_identity: Some("RG2".into()),
            })
            .await
            .unwrap();

        let rg2 = f
            .state
            .patients
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.identity == "RG2")
            .unwrap();
        let err = f.state.patients.delete(rg2.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let rg3 = f
            .state
            .patients
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.identity == "RG3")
            .unwrap();
        f.state.patients.delete(rg3.id).await.unwrap();
        assert!(matches!(
            f.state.patients.get(rg3.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn replace_requires_every_field() {
        let f = fixture().await;
        let created = f.state.patients.create(patient("RG7")).await.unwrap();

        let err = f
            .state
            .patients
            .replace(created.id, PatientFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let replaced = f
            .state
            .patients
            .replace(created.id, patient("RG8"))
            .await
            .unwrap();
        assert_eq!(replaced.identity, "RG8");
    }
}
