use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Missing or empty field, unparseable date, or lead-time violation.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    DuplicateIdentifier(String),
    /// Overlapping window for a shared dentist or patient.
    #[error("{0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    /// The commit scope could not be acquired in time; nothing was written.
    #[error("{0}")]
    Transient(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation(msg) => ServiceError::DuplicateIdentifier(msg),
            StoreError::ForeignKeyViolation(msg) => ServiceError::Conflict(msg),
            StoreError::Contention(msg) => {
                ServiceError::Transient(format!("storage is busy, try again: {msg}"))
            }
            StoreError::Database(e) => ServiceError::Persistence(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_classified() {
        assert!(matches!(
            ServiceError::from(StoreError::UniqueViolation("license".into())),
            ServiceError::DuplicateIdentifier(_)
        ));
        assert!(matches!(
            ServiceError::from(StoreError::ForeignKeyViolation("dentist".into())),
            ServiceError::Conflict(_)
        ));

        let busy = ServiceError::from(StoreError::Contention("lock timeout".into()));
        assert!(busy.is_retryable());

        let broken = ServiceError::from(StoreError::Database(sqlx::Error::RowNotFound));
        assert!(matches!(broken, ServiceError::Persistence(_)));
        assert!(!broken.is_retryable());
    }
}
