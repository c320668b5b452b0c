//! Fire-and-forget notifications about committed appointments.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::AppointmentDetail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEventKind {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentEvent {
    pub kind: AppointmentEventKind,
    pub occurred_at: DateTime<Utc>,
    pub appointment: AppointmentDetail,
}

#[derive(Debug, thiserror::Error)]
pub enum EventSinkError {
    #[error("event buffer is full")]
    Full,
    #[error("event consumer has gone away")]
    Closed,
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Must return without waiting on delivery.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &AppointmentEvent) -> Result<(), EventSinkError>;
}

/// Writes each event as one structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event: &AppointmentEvent) -> Result<(), EventSinkError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(
            target: "appointment_events",
            kind = ?event.kind,
            appointment_id = event.appointment.appointment.id,
            %payload,
            "appointment event"
        );
        Ok(())
    }
}

/// Hands events to a bounded queue; a full queue drops the event.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<AppointmentEvent>,
}

impl ChannelEventSink {
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<AppointmentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: &AppointmentEvent) -> Result<(), EventSinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EventSinkError::Full,
            mpsc::error::TrySendError::Closed(_) => EventSinkError::Closed,
        })
    }
}

/// Drains `rx` into `sink` until every sender is dropped.
pub async fn relay<S: EventSink>(mut rx: mpsc::Receiver<AppointmentEvent>, sink: S) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.publish(&event) {
            tracing::warn!(error = %e, "dropping appointment event");
        }
    }
    tracing::debug!("appointment event relay stopped");
}

#[cfg(test)]
pub use testing::{FailingSink, RecordingSink};
