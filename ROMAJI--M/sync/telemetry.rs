use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{Notification, NotificationPublisher};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::runtime::{Builder, Handle};

/// Builder for sync telemetry sinks.
pub struct SyncTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    log_sink: Option<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn NotificationPublisher>>,
}

impl SyncTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            log_sink: None,
            event_publisher: None,
        }
    }

    /// Writes JSON lines to the given path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Uses an existing sink; takes precedence over `log_path`.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn NotificationPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    ///
    /// # Errors
    /// Returns an error when the log file cannot be opened.
    pub fn build(self) -> Result<SyncTelemetry> {
        let sink = match (self.log_sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => {
                Some(Arc::new(JsonLogger::new(path)?) as Arc<dyn LogSink>)
            }
            (None, None) => None,
        };
        Ok(SyncTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared across sync components.
///
/// Every record is mirrored to `tracing`; sinks and publishers are optional.
#[derive(Clone)]
pub struct SyncTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for SyncTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTelemetry")
            .field("module", &self.inner.module)
            .finish_non_exhaustive()
    }
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    publisher: Option<Arc<dyn NotificationPublisher>>,
}

impl SyncTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> SyncTelemetryBuilder {
        SyncTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    ///
    /// # Errors
    /// Returns an error when the sink rejects the record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let mut record = LogRecord::new(&self.inner.module, level, message);
        if let Value::Object(fields) = metadata {
            record = fields
                .into_iter()
                .fold(record, |record, (key, value)| record.with_field(key, value));
        }
        trace(&record);
        if let Some(sink) = &self.inner.sink {
            sink.log(&record)?;
        }
        Ok(())
    }

    /// Publishes a telemetry notification on the bus.
    ///
    /// # Errors
    /// Returns an error when no runtime can be built to publish the event.
    pub fn event(&self, name: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let notification = Notification::new(name, payload);
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(notification).await {
                    tracing::warn!("telemetry event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            Builder::new_current_thread()
                .build()?
                .block_on(publisher.publish(notification))
        }
    }
}

fn trace(record: &LogRecord) {
    let line = record.render();
    match record.level {
        LogLevel::Debug => tracing::debug!("{line}"),
        LogLevel::Info => tracing::info!("{line}"),
        LogLevel::Warn => tracing::warn!("{line}"),
        LogLevel::Error => tracing::error!("{line}"),
    }
}
