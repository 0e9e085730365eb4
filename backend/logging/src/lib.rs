//! Structured logging for PairLink.
//!
//! Console and rolling JSON file output, key redaction, and a domain event log.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EVENT_TARGET, EventLogEntry, EventLogger};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
