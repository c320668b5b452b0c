use std::sync::Arc;

use super::ServiceError;
use crate::store::{DentistRepository, PatientRepository};

/// Uniqueness of dentist licenses and patient identity documents.
///
/// Callers hold the identifier's lock from [`super::locks`] around the check
/// and the write that follows it.
pub struct IdentityRegistry {
    dentists: Arc<dyn DentistRepository>,
    patients: Arc<dyn PatientRepository>,
}

impl IdentityRegistry {
    pub fn new(dentists: Arc<dyn DentistRepository>, patients: Arc<dyn PatientRepository>) -> Self {
        Self { dentists, patients }
    }

    pub async fn is_license_unique(
        &self,
        license: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool, ServiceError> {
        let owner = self.dentists.find_by_license(license).await?;
        Ok(owner.is_none_or(|d| Some(d.id) == exclude_id))
    }

    pub async fn is_identity_unique(
        &self,
        identity: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool, ServiceError> {
        let owner = self.patients.find_by_identity(identity).await?;
        Ok(owner.is_none_or(|p| Some(p.id) == exclude_id))
    }

    pub async fn ensure_license_unique(
        &self,
        license: &str,
        exclude_id: Option<i64>,
    ) -> Result<(), ServiceError> {
        if self.is_license_unique(license, exclude_id).await? {
            Ok(())
        } else {
            Err(ServiceError::DuplicateIdentifier(format!(
                "license number {license} already exists"
            )))
        }
    }

    pub async fn ensure_identity_unique(
        &self,
        identity: &str,
        exclude_id: Option<i64>,
    ) -> Result<(), ServiceError> {
        if self.is_identity_unique(identity, exclude_id).await? {
            Ok(())
        } else {
            Err(ServiceError::DuplicateIdentifier(format!(
                "there's a patient with identity number {identity}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewDentist, NewPatient};
    use crate::store::MemoryStore;
    use chrono::Utc;

    async fn registry() -> (IdentityRegistry, i64, i64) {
        let store = Arc::new(MemoryStore::new());
        let dentist = DentistRepository::insert(
            store.as_ref(),
            &NewDentist {
                last_name: "Souza".into(),
                first_name: "Ana".into(),
                license: "CRO1".into(),
            },
        )
        .await
        .unwrap();
        let patient = PatientRepository::insert(
            store.as_ref(),
            &NewPatient {
                last_name: "Lima".into(),
                first_name: "Rui".into(),
                identity: "RG1".into(),
                registered_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let registry = IdentityRegistry::new(store.clone(), store);
        (registry, dentist.id, patient.id)
    }

    #[tokio::test]
    async fn taken_license_is_not_unique() {
        let (registry, dentist_id, _) = registry().await;
        assert!(!registry.is_license_unique("CRO1", None).await.unwrap());
        assert!(registry.is_license_unique("CRO2", None).await.unwrap());
        // a record never collides with itself
        assert!(registry.is_license_unique("CRO1", Some(dentist_id)).await.unwrap());
    }

    #[tokio::test]
    async fn taken_identity_reports_duplicate() {
        let (registry, _, patient_id) = registry().await;
        let err = registry.ensure_identity_unique("RG1", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateIdentifier(_)));
        assert!(registry.ensure_identity_unique("RG1", Some(patient_id)).await.is_ok());
        assert!(registry.ensure_identity_unique("RG2", None).await.is_ok());
    }
}
