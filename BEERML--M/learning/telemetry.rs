use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{BlockingPublisher, EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel};

/// Builder configuring telemetry for a demo run.
pub struct LearningTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl LearningTelemetryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Assigns the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<LearningTelemetry> {
        let logger = self.log_path.map(JsonLogger::new).transpose()?;
        let events = self
            .event_publisher
            .map(BlockingPublisher::new)
            .transpose()?;
        Ok(LearningTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                events,
            }),
        })
    }
}

/// Telemetry handle shared by the stages of a run. Cloning is cheap.
#[derive(Clone)]
pub struct LearningTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for LearningTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearningTelemetry")
            .field("module", &self.inner.module)
            .field("logging", &self.inner.logger.is_some())
            .field("events", &self.inner.events.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    events: Option<BlockingPublisher>,
}

impl LearningTelemetry {
    /// Returns a builder for this telemetry helper.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> LearningTelemetryBuilder {
        LearningTelemetryBuilder::new(module)
    }

    /// Telemetry that records nothing.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                events: None,
            }),
        }
    }

    /// Module name stamped on records.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs a structured record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            logger.emit(&self.inner.module, level, message, metadata)?;
        }
        Ok(())
    }

    /// Emits an event entry via the configured bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(events) = &self.inner.events {
            events.publish(EventRecord::new(&self.inner.module, event_type, payload))?;
        }
        Ok(())
    }

    /// Best-effort info record for a completed stage.
    pub fn stage(&self, message: &str, metadata: Value) {
        let _ = self.log(LogLevel::Info, message, metadata);
    }

    /// Best-effort event publish.
    pub fn announce(&self, event_type: &str, payload: Value) {
        let _ = self.event(event_type, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_logs_and_emits() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("learning.log");
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = LearningTelemetry::builder("classification")
            .log_path(&log_path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry.stage("training_complete", json!({ "classes": 4 }));
        telemetry.announce("beerml.classification.trained", json!({ "rows": 10 }));
        let records = shared_logging::read_records(&log_path).unwrap();
        assert_eq!(records[0].message, "training_complete");
        assert_eq!(records[0].module, "classification");
        assert_eq!(bus.of_type("beerml.classification.trained").len(), 1);
    }

    #[test]
    fn disabled_telemetry_is_silent() {
        let telemetry = LearningTelemetry::disabled("regression");
        telemetry.stage("training_start", json!({}));
        assert!(telemetry.event("beerml.regression.trained", json!({})).is_ok());
        assert_eq!(telemetry.module(), "regression");
    }
}
