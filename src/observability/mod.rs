//! Observability: structured logging, typed events and counters
//!
//! Observability is read-only: it never changes the outcome of an operation.
//!
//! ```ignore
//! use aerolog::observability::{log_event, Event};
//!
//! log_event(Event::SealComplete, &[("ls", "ls7"), ("hwm", "104")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
