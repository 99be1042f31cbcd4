//! Step lifecycle events.
//!
//! The `Report` interceptor turns every step execution into a pair of
//! [`StepEvent`]s delivered to the engine's [`EventSink`].

mod event;
mod sink;

pub use event::{StepEvent, StepEventKind};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
