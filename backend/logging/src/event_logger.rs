//! Domain Event Logger
//!
//! Mirrors pairing and session events into the `pairlink_events` target.

use chrono::{DateTime, Utc};
use pairlink_core::{PairingEvent, SessionEvent};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::redact::redact_sensitive_data;

pub const EVENT_TARGET: &str = "pairlink_events";

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
    pub event: serde_json::Value,
}

pub struct EventLogger;

impl EventLogger {
    pub fn log_pairing(event: &PairingEvent) {
        Self::emit(Self::entry("pairing", event));
    }

    pub fn log_session(event: &SessionEvent) {
        Self::emit(Self::entry("session", event));
    }

    /// Serialize an event into a log entry. Redaction happens on output.
    pub fn entry<E: Serialize>(source: &'static str, event: &E) -> EventLogEntry {
        EventLogEntry {
            source,
            timestamp: Utc::now(),
            event: serde_json::to_value(event).unwrap_or_default(),
        }
    }

    fn emit(entry: EventLogEntry) {
        let line = serde_json::to_string(&entry).unwrap_or_default();
        info!(target: EVENT_TARGET, source = entry.source, event = %redact_sensitive_data(&line), "Domain event");
    }

    /// Log every event from both receivers until their buses close.
    pub fn spawn(
        mut pairing: broadcast::Receiver<PairingEvent>,
        mut session: broadcast::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (mut pairing_open, mut session_open) = (true, true);
            while pairing_open || session_open {
                tokio::select! {
                    received = pairing.recv(), if pairing_open => match received {
                        Ok(event) => Self::log_pairing(&event),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "Pairing event log lagged"),
                        Err(RecvError::Closed) => pairing_open = false,
                    },
                    received = session.recv(), if session_open => match received {
                        Ok(event) => Self::log_session(&event),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session event log lagged"),
                        Err(RecvError::Closed) => session_open = false,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_carries_tagged_event() {
        let entry = EventLogger::entry(
            "pairing",
            &PairingEvent::Deleted {
                id: 4,
                topic: "t".into(),
            },
        );
        assert_eq!(entry.source, "pairing");
        assert_eq!(entry.event["type"], "deleted");
        assert_eq!(entry.event["id"], 4);
    }

    #[tokio::test]
    async fn spawned_logger_stops_when_buses_close() {
        let (pairing_tx, pairing_rx) = broadcast::channel(4);
        let (session_tx, session_rx) = broadcast::channel::<SessionEvent>(4);
        let handle = EventLogger::spawn(pairing_rx, session_rx);
        pairing_tx
            .send(PairingEvent::Expired { topic: "t".into() })
            .unwrap();
        drop(pairing_tx);
        drop(session_tx);
        handle.await.unwrap();
    }
}
