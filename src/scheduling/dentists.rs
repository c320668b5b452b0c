use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::fields::{merged, required};
use super::identity::IdentityRegistry;
use super::locks::{dentist_key, key_set, KeyGuard, LockTable, RELOCK_ATTEMPTS};
use super::ServiceError;
use crate::models::{Dentist, NewDentist};
use crate::store::{AppointmentRepository, DentistRepository};

#[derive(Debug, Clone, Default)]
pub struct DentistFields {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub license: Option<String>,
}

impl DentistFields {
    fn complete(&self) -> Result<NewDentist, ServiceError> {
        Ok(NewDentist {
            last_name: required("lastName", self.last_name.as_deref())?,
            first_name: required("firstName", self.first_name.as_deref())?,
            license: required("license", self.license.as_deref())?,
        })
    }

    fn merged_into(&self, current: &Dentist) -> NewDentist {
        NewDentist {
            last_name: merged(&current.last_name, self.last_name.as_deref()),
            first_name: merged(&current.first_name, self.first_name.as_deref()),
            license: merged(&current.license, self.license.as_deref()),
        }
    }
}

pub struct DentistService {
    repo: Arc<dyn DentistRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    registry: Arc<IdentityRegistry>,
    locks: Arc<LockTable>,
    commit_timeout: Duration,
}

impl DentistService {
    pub fn new(
        repo: Arc<dyn DentistRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        registry: Arc<IdentityRegistry>,
        locks: Arc<LockTable>,
        commit_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            appointments,
            registry,
            locks,
            commit_timeout,
        }
    }

    pub async fn create(&self, fields: DentistFields) -> Result<Dentist, ServiceError> {
        let new = fields.complete()?;

        let _guard = self
            .locks
            .acquire_within(&key_set([dentist_key(&new.license)]), self.commit_timeout)
            .await?;
        self.registry.ensure_license_unique(&new.license, None).await?;
        let dentist = self.repo.insert(&new).await?;

        info!(dentist_id = dentist.id, license = %dentist.license, "dentist registered");
        Ok(dentist)
    }

    pub async fn get(&self, id: i64) -> Result<Dentist, ServiceError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("dentist {id}")))
    }

    pub async fn list_all(&self) -> Result<Vec<Dentist>, ServiceError> {
        Ok(self.repo.list_all().await?)
    }

    /// Blank or missing fields keep their stored value. A license still
    /// referenced by appointments cannot change.
    pub async fn update(&self, id: i64, fields: DentistFields) -> Result<Dentist, ServiceError> {
        let (_guard, current) = self
            .lock_fresh(id, |d| vec![dentist_key(&fields.merged_into(d).license)])
            .await?;
        let next = fields.merged_into(&current);

        if next.license != current.license {
            self.registry
                .ensure_license_unique(&next.license, Some(id))
                .await?;
            self.ensure_unreferenced(&current.license, "changed").await?;
        }

        let dentist = self
            .repo
            .update(id, &next)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("dentist {id}")))?;
        info!(dentist_id = id, license = %dentist.license, "dentist updated");
        Ok(dentist)
    }

    /// Every field is required.
    pub async fn replace(&self, id: i64, fields: DentistFields) -> Result<Dentist, ServiceError> {
        let full = fields.complete()?;
        self.update(
            id,
            DentistFields {
                last_name: Some(full.last_name),
                first_name: Some(full.first_name),
                license: Some(full.license),
            },
        )
        .await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let (_guard, current) = self.lock_fresh(id, |_| Vec::new()).await?;
        self.ensure_unreferenced(&current.license, "deleted").await?;

        if !self.repo.delete(id).await? {
            return Err(ServiceError::NotFound(format!("dentist {id}")));
        }
        info!(dentist_id = id, license = %current.license, "dentist removed");
        Ok(())
    }

    /// Locks the dentist's license plus `also`, then returns the row as read
    /// under those locks. Re-locks when the license moved in between.
    async fn lock_fresh<F>(&self, id: i64, also: F) -> Result<(KeyGuard, Dentist), ServiceError>
    where
        F: Fn(&Dentist) -> Vec<String>,
    {
        let mut seen = self.get(id).await?;
        for _ in 0..RELOCK_ATTEMPTS {
            let keys = key_set(also(&seen).into_iter().chain([dentist_key(&seen.license)]));
            let guard = self.locks.acquire_within(&keys, self.commit_timeout).await?;

            let current = self.get(id).await?;
            if current.license == seen.license {
                return Ok((guard, current));
            }
            debug!(dentist_id = id, from = %seen.license, to = %current.license, "license moved before lock");
            seen = current;
        }
        Err(ServiceError::Transient(
            "the dentist is being edited, please try again".into(),
        ))
    }

    async fn ensure_unreferenced(&self, license: &str, action: &str) -> Result<(), ServiceError> {
        let booked = self.appointments.list_by_dentist(license).await?;
        if booked.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Conflict(format!(
                "dentist {license} has {} appointment(s) and cannot be {action}",
                booked.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::appointments::AppointmentFields;
    use crate::scheduling::test_support::{fixture, GatedStore};

    fn dentist(license: &str) -> DentistFields {
        DentistFields {
            last_name: Some("Moura".into()),
            first_name: Some("Caio".into()),
            license: Some(license.into()),
        }
    }

    async fn book(f: &crate::scheduling::test_support::Fixture, license: &str) {
        f.state
            .appointments
            .create(AppointmentFields {
                description: Some("cleaning".into()),
                date_and_time: Some("20/05/2030 10:00".into()),
                dentist_license: Some(license.into()),
                patient_identity: Some("RG1".into()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_license_is_rejected() {
        let f = fixture().await;
        let service = &f.state.dentists;

        let created = service.create(dentist("CRO7")).await.unwrap();
        assert_eq!(created.license, "CRO7");

        let err = service.create(dentist("CRO1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateIdentifier(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_fields_are_validation_errors() {
        let f = fixture().await;
        let mut fields = dentist("CRO7");
        fields.first_name = Some(" ".into());
        let err = f.state.dentists.create(fields).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_of_one_license_admit_one() {
        let f = fixture().await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let service = f.state.dentists.clone();
            tasks.push(tokio::spawn(async move { service.create(dentist("CRO7")).await }));
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
    async fn partial_update_merges_into_the_stored_record() {
        let f = fixture().await;
        let id = f
            .state
            .dentists
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.license == "CRO1")
            .unwrap()
            .id;

        let gated = GatedStore::new(f.store.clone());
        let slow = Arc::new(DentistService::new(
            gated.clone(),
            f.store.clone(),
            Arc::new(IdentityRegistry::new(f.store.clone(), f.store.clone())),
            Arc::new(LockTable::default()),
            f.settings().commit_timeout,
        ));

        let rename = tokio::spawn({
            let slow = slow.clone();
            async move {
                slow.update(
                    id,
                    DentistFields {
                        first_name: Some("Bia".into()),
                        ..Default::default()
                    },
                )
                .await
            }
        });
        gated.gate.reached().await;

        f.state
            .dentists
            .update(
                id,
                DentistFields {
                    last_name: Some("Rocha".into()),
                    license: Some("CRO7".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        gated.gate.release();

        let renamed = rename.await.unwrap().unwrap();
        assert_eq!(renamed.first_name, "Bia");
        assert_eq!(renamed.last_name, "Rocha");
        assert_eq!(renamed.license, "CRO7");
        assert!(f.state.dentists.list_all().await.unwrap().iter().all(|d| d.license != "CRO1"));
    }

    #[tokio::test]
    async fn partial_update_and_license_change() {
        let f = fixture().await;
        let service = &f.state.dentists;
        let created = service.create(dentist("CRO7")).await.unwrap();

        let renamed = service
            .update(
                created.id,
                DentistFields {
                    first_name: Some("Bia".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.first_name, "Bia");
        assert_eq!(renamed.last_name, "Moura");

        let relicensed = service
            .update(
                created.id,
                DentistFields {
                    license: Some("CRO8".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(relicensed.license, "CRO8");

        let taken = service
            .update(
                created.id,
                DentistFields {
                    license: Some("CRO2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(taken, ServiceError::DuplicateIdentifier(_)));
    }

    #[tokio::test]
    async fn booked_dentist_keeps_license_and_record() {
        let f = fixture().await;
        book(&f, "CRO1").await;
        let service = &f.state.dentists;
        let cro1 = service
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.license == "CRO1")
            .unwrap();

        let err = service
            .update(
                cro1.id,
                DentistFields {
                    license: Some("CRO9".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err = service.delete(cro1.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(service.get(cro1.id).await.unwrap().license, "CRO1");
    }

    #[tokio::test]
    async fn replace_and_delete() {
        let f = fixture().await;
        let service = &f.state.dentists;
        let created = service.create(dentist("CRO7")).await.unwrap();

        let err = service
            .replace(
                created.id,
                DentistFields {
                    last_name: Some("Only".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        service.delete(created.id).await.unwrap();
        assert!(matches!(service.get(created.id).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(service.delete(created.id).await, Err(ServiceError::NotFound(_))));
    }
}
