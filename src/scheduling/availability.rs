use std::sync::Arc;

use super::window::TimeWindow;
use super::ServiceError;
use crate::models::Appointment;
use crate::store::AppointmentRepository;

/// First candidate that shares the dentist or the patient and whose window
/// intersects `window`. `exclude` skips the appointment being re-validated.
pub fn find_conflict<'a>(
    window: &TimeWindow,
    dentist_license: &str,
    patient_identity: &str,
    exclude: Option<i64>,
    candidates: &'a [Appointment],
) -> Option<&'a Appointment> {
    candidates.iter().find(|existing| {
        if Some(existing.id) == exclude {
            return false;
        }
        let shares_participant = existing.dentist_license == dentist_license
            || existing.patient_identity == patient_identity;
        shares_participant && existing.window().intersects(window)
    })
}

pub fn describe_conflict(existing: &Appointment, dentist_license: &str) -> String {
    let who = if existing.dentist_license == dentist_license {
        "dentist"
    } else {
        "patient"
    };
    format!(
        "the selected date and time isn't available for the {who} (overlaps appointment {})",
        existing.id
    )
}

/// Read-only answer to "could this window be booked right now".
pub struct AvailabilityIndex {
    repo: Arc<dyn AppointmentRepository>,
}

impl AvailabilityIndex {
    pub fn new(repo: Arc<dyn AppointmentRepository>) -> Self {
        Self { repo }
    }

    pub async fn is_available(
        &self,
        window: &TimeWindow,
        dentist_license: &str,
        patient_identity: &str,
        exclude: Option<i64>,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .conflicting(window, dentist_license, patient_identity, exclude)
            .await?
            .is_none())
    }

    pub async fn conflicting(
        &self,
        window: &TimeWindow,
        dentist_license: &str,
        patient_identity: &str,
        exclude: Option<i64>,
    ) -> Result<Option<Appointment>, ServiceError> {
        let (from, to) = window.candidate_range();
        let candidates = self.repo.list_starting_between(from, to).await?;
        tracing::debug!(candidates = candidates.len(), %from, %to, "availability scan");

        Ok(
            find_conflict(window, dentist_license, patient_identity, exclude, &candidates)
                .cloned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 20, hour, minute, 0).unwrap()
    }

    fn booked(id: i64, hour: u32, minute: u32, dentist: &str, patient: &str) -> Appointment {
        Appointment {
            id,
            description: "checkup".into(),
            start_at: at(hour, minute),
            dentist_license: dentist.into(),
            patient_identity: patient.into(),
        }
    }

    #[test]
    fn same_dentist_overlap_conflicts() {
        let existing = [booked(1, 10, 0, "CRO1", "RG1")];
        let window = TimeWindow::starting_at(at(10, 30));
        let hit = find_conflict(&window, "CRO1", "RG2", None, &existing);
        assert_eq!(hit.map(|a| a.id), Some(1));
    }

    #[test]
    fn same_patient_overlap_conflicts() {
        let existing = [booked(1, 10, 0, "CRO1", "RG1")];
        let window = TimeWindow::starting_at(at(9, 30));
        assert!(find_conflict(&window, "CRO2", "RG1", None, &existing).is_some());
    }

    #[test]
    fn both_participants_overlap_conflicts() {
        let existing = [booked(1, 10, 0, "CRO1", "RG1")];
        let window = TimeWindow::starting_at(at(10, 0));
        assert!(find_conflict(&window, "CRO1", "RG1", None, &existing).is_some());
    }

    #[test]
    fn unrelated_participants_never_conflict() {
        let existing = [booked(1, 10, 0, "CRO1", "RG1")];
        let window = TimeWindow::starting_at(at(10, 0));
        assert!(find_conflict(&window, "CRO2", "RG2", None, &existing).is_none());
    }

    #[test]
    fn boundary_is_not_a_conflict() {
        let existing = [booked(1, 10, 0, "CRO1", "RG1")];
        assert!(
            find_conflict(&TimeWindow::starting_at(at(11, 0)), "CRO1", "RG1", None, &existing)
                .is_none()
        );
        assert!(
            find_conflict(&TimeWindow::starting_at(at(9, 0)), "CRO1", "RG1", None, &existing)
                .is_none()
        );
    }

    #[test]
    fn excluded_appointment_is_skipped() {
        let existing = [booked(1, 10, 0, "CRO1", "RG1"), booked(2, 12, 0, "CRO1", "RG9")];
        let window = TimeWindow::starting_at(at(10, 15));
        assert!(find_conflict(&window, "CRO1", "RG1", Some(1), &existing).is_none());
        assert!(find_conflict(&window, "CRO1", "RG1", Some(2), &existing).is_some());
    }

    #[test]
    fn conflict_message_names_the_shared_participant() {
        let existing = booked(7, 10, 0, "CRO1", "RG1");
        assert!(describe_conflict(&existing, "CRO1").contains("dentist"));
        assert!(describe_conflict(&existing, "CRO2").contains("patient"));
    }
}
