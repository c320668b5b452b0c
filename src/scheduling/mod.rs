//! Booking rules, the conflict engine and the services built on them.

use std::time::Duration;

pub mod appointments;
pub mod availability;
pub mod coordinator;
pub mod dentists;
pub mod error;
pub mod events;
pub mod fields;
pub mod identity;
pub mod locks;
pub mod patients;
pub mod window;

#[cfg(test)]
pub mod test_support;

pub use error::ServiceError;

use window::ClinicTime;

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Upper bound on waiting for a commit scope before answering "try again".
    pub commit_timeout: Duration,
    pub clinic_time: ClinicTime,
}
