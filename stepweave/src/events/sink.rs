//! Event sink trait and implementations.

use super::StepEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Trait for sinks receiving step events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &StepEvent);

    /// Tries to emit an event without blocking.
    ///
    /// This method never fails. Errors are logged but suppressed.
    fn try_emit(&self, event: &StepEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &StepEvent) {}

    fn try_emit(&self, _event: &StepEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &StepEvent) {
        let outcome = event.outcome.map(|o| o.as_str()).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.kind,
                step = %event.step,
                prefix = %event.prefix,
                outcome,
                duration_ms = ?event.duration_ms,
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = %event.kind,
                step = %event.step,
                prefix = %event.prefix,
                outcome,
                duration_ms = ?event.duration_ms,
                "Event: {}", event.kind
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &StepEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &StepEvent) {
        self.log_event(event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<StepEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<StepEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with a prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<StepEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the event types of one step, in emission order.
    #[must_use]
    pub fn types_for(&self, step: &str) -> Vec<&'static str> {
        self.events
            .read()
            .iter()
            .filter(|e| e.step == step)
            .map(StepEvent::event_type)
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &StepEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &StepEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepOutcome;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        let event = StepEvent::started("build", "", "ci");
        NoOpEventSink.emit(&event).await;
        LoggingEventSink::default().emit(&event).await;
        LoggingEventSink::debug().try_emit(&event);
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        let started = StepEvent::started("build", "", "ci");
        sink.emit(&started).await;
        sink.try_emit(&started.finish(StepOutcome::Error, Some("boom".into())));
        sink.emit(&StepEvent::started("lint", "", "ci")).await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.types_for("build"), vec!["step.started", "step.failed"]);
        assert_eq!(sink.events_of_type("step.started").len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
