use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    AppointmentRepository, BookingScope, DentistRepository, PatientRepository, StoreError,
};
use crate::models::{
    Appointment, AppointmentDetail, Dentist, NewAppointment, NewDentist, NewPatient, Patient,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

/* ============================================================
   Row shapes
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct AppointmentDetailRow {
    appointment_id: i64,
    description: String,
    start_at: DateTime<Utc>,
    dentist_license: String,
    patient_identity: String,

    d_id: i64,
    d_last: String,
    d_first: String,

    p_id: i64,
    p_last: String,
    p_first: String,
    p_registered_at: DateTime<Utc>,
}

impl From<AppointmentDetailRow> for AppointmentDetail {
    fn from(r: AppointmentDetailRow) -> Self {
        AppointmentDetail {
            dentist: Dentist {
                id: r.d_id,
                last_name: r.d_last,
                first_name: r.d_first,
                license: r.dentist_license.clone(),
            },
            patient: Patient {
                id: r.p_id,
                last_name: r.p_last,
                first_name: r.p_first,
                identity: r.patient_identity.clone(),
                registered_at: r.p_registered_at,
            },
            appointment: Appointment {
                id: r.appointment_id,
                description: r.description,
                start_at: r.start_at,
                dentist_license: r.dentist_license,
                patient_identity: r.patient_identity,
            },
        }
    }
}

const DETAIL_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.description,
      a.start_at,
      a.dentist_license,
      a.patient_identity,

      d.dentist_id AS d_id,
      d.last_name  AS d_last,
      d.first_name AS d_first,

      p.patient_id    AS p_id,
      p.last_name     AS p_last,
      p.first_name    AS p_first,
      p.registered_at AS p_registered_at

    FROM appointment a
    JOIN dentist d ON d.license = a.dentist_license
    JOIN patient p ON p.identity = a.patient_identity
"#;

fn detail_query(filter: &str) -> String {
    format!("{DETAIL_SELECT} {filter} ORDER BY a.start_at ASC, a.appointment_id ASC")
}

const APPOINTMENT_COLUMNS: &str =
    "appointment_id AS id, description, start_at, dentist_license, patient_identity";

/* ============================================================
   Appointments
   ============================================================ */

#[async_trait]
impl AppointmentRepository for PgStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<AppointmentDetail>, StoreError> {
        let row = sqlx::query_as::<_, AppointmentDetailRow>(&detail_query(
            "WHERE a.appointment_id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_all(&self) -> Result<Vec<AppointmentDetail>, StoreError> {
        let rows = sqlx::query_as::<_, AppointmentDetailRow>(&detail_query(""))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_by_dentist(&self, license: &str) -> Result<Vec<AppointmentDetail>, StoreError> {
        let rows = sqlx::query_as::<_, AppointmentDetailRow>(&detail_query(
            "WHERE a.dentist_license = $1",
        ))
        .bind(license)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_by_patient(
        &self,
        identity: &str,
    ) -> Result<Vec<AppointmentDetail>, StoreError> {
        let rows = sqlx::query_as::<_, AppointmentDetailRow>(&detail_query(
            "WHERE a.patient_identity = $1",
        ))
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment \
             WHERE start_at >= $1 AND start_at < $2 ORDER BY start_at ASC"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn begin_booking(&self, keys: &[String]) -> Result<Box<dyn BookingScope>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // lock_timeout does not accept bind parameters
        let timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await?;

        // Serializes competing bookings across service instances. Callers
        // pass keys sorted so two scopes never wait on each other in a cycle.
        for key in keys {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        Ok(Box::new(PgBookingScope { tx }))
    }
}

struct PgBookingScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookingScope for PgBookingScope {
    async fn find(&mut self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn find_detail(&mut self, id: i64) -> Result<Option<AppointmentDetail>, StoreError> {
        let row = sqlx::query_as::<_, AppointmentDetailRow>(&detail_query(
            "WHERE a.appointment_id = $1",
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn dentist_exists(&mut self, license: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM dentist WHERE license = $1)")
                .bind(license)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn patient_exists(&mut self, identity: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patient WHERE identity = $1)")
                .bind(identity)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn appointments_starting_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment \
             WHERE start_at >= $1 AND start_at < $2 ORDER BY start_at ASC"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn insert(&mut self, appointment: &NewAppointment) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO appointment (description, start_at, dentist_license, patient_identity)
            VALUES ($1, $2, $3, $4)
            RETURNING appointment_id
            "#,
        )
        .bind(&appointment.description)
        .bind(appointment.start_at)
        .bind(&appointment.dentist_license)
        .bind(&appointment.patient_identity)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn update(&mut self, id: i64, appointment: &NewAppointment) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE appointment
            SET description = $2,
                start_at = $3,
                dentist_license = $4,
                patient_identity = $5
            WHERE appointment_id = $1
            "#,
        )
        .bind(id)
        .bind(&appointment.description)
        .bind(appointment.start_at)
        .bind(&appointment.dentist_license)
        .bind(&appointment.patient_identity)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM appointment WHERE appointment_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/* ============================================================
   Dentists
   ============================================================ */

const DENTIST_COLUMNS: &str = "dentist_id AS id, last_name, first_name, license";

#[async_trait]
impl DentistRepository for PgStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Dentist>, StoreError> {
        let row = sqlx::query_as::<_, Dentist>(&format!(
            "SELECT {DENTIST_COLUMNS} FROM dentist WHERE dentist_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_license(&self, license: &str) -> Result<Option<Dentist>, StoreError> {
        let row = sqlx::query_as::<_, Dentist>(&format!(
            "SELECT {DENTIST_COLUMNS} FROM dentist WHERE license = $1"
        ))
        .bind(license)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_all(&self) -> Result<Vec<Dentist>, StoreError> {
        let rows = sqlx::query_as::<_, Dentist>(&format!(
            "SELECT {DENTIST_COLUMNS} FROM dentist ORDER BY dentist_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert(&self, dentist: &NewDentist) -> Result<Dentist, StoreError> {
        let row = sqlx::query_as::<_, Dentist>(&format!(
            "INSERT INTO dentist (last_name, first_name, license) VALUES ($1, $2, $3) \
             RETURNING {DENTIST_COLUMNS}"
        ))
        .bind(&dentist.last_name)
        .bind(&dentist.first_name)
        .bind(&dentist.license)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update(&self, id: i64, dentist: &NewDentist) -> Result<Option<Dentist>, StoreError> {
        let row = sqlx::query_as::<_, Dentist>(&format!(
            "UPDATE dentist SET last_name = $2, first_name = $3, license = $4 \
             WHERE dentist_id = $1 RETURNING {DENTIST_COLUMNS}"
        ))
        .bind(id)
        .bind(&dentist.last_name)
        .bind(&dentist.first_name)
        .bind(&dentist.license)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM dentist WHERE dentist_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/* ============================================================
   Patients
   ============================================================ */

const PATIENT_COLUMNS: &str = "patient_id AS id, last_name, first_name, identity, registered_at";

#[async_trait]
impl PatientRepository for PgStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Patient>, StoreError> {
        let row = sqlx::query_as::<_, Patient>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patient WHERE patient_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<Patient>, StoreError> {
        let row = sqlx::query_as::<_, Patient>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patient WHERE identity = $1"
        ))
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_all(&self) -> Result<Vec<Patient>, StoreError> {
        let rows = sqlx::query_as::<_, Patient>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patient ORDER BY patient_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert(&self, patient: &NewPatient) -> Result<Patient, StoreError> {
        let row = sqlx::query_as::<_, Patient>(&format!(
            "INSERT INTO patient (last_name, first_name, identity, registered_at) \
             VALUES ($1, $2, $3, $4) RETURNING {PATIENT_COLUMNS}"
        ))
        .bind(&patient.last_name)
        .bind(&patient.first_name)
        .bind(&patient.identity)
        .bind(patient.registered_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update(&self, id: i64, patient: &NewPatient) -> Result<Option<Patient>, StoreError> {
        let row = sqlx::query_as::<_, Patient>(&format!(
            "UPDATE patient SET last_name = $2, first_name = $3, identity = $4 \
             WHERE patient_id = $1 RETURNING {PATIENT_COLUMNS}"
        ))
        .bind(id)
        .bind(&patient.last_name)
        .bind(&patient.first_name)
        .bind(&patient.identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM patient WHERE patient_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
