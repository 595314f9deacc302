use std::sync::Arc;

use tracing::Level;

use crate::{Event, EventBinding, Handler, HandlerConfig, HandlerId};

/// Handler that writes every event it's bound to through `tracing`.
///
/// Each binding carries its own level, so one handler can log `.start`
/// events at `DEBUG` and `.panic` events at `ERROR`.
///
/// ```rust
/// use pulse::{Dispatcher, LogHandler};
/// use tracing::Level;
///
/// let dispatcher = Dispatcher::default();
/// dispatcher.add_handler(
///     LogHandler::new("log")
///         .on("db.query.start", Level::DEBUG)
///         .on("db.query.end", Level::INFO)
///         .on("db.query.panic", Level::ERROR),
/// )?;
/// # Ok::<(), pulse::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct LogHandler {
    id: HandlerId,
    bindings: Vec<EventBinding>,
    config: HandlerConfig,
}

impl LogHandler {
    pub fn new(id: impl Into<HandlerId>) -> Self {
        Self {
            id: id.into(),
            bindings: Vec::new(),
            config: HandlerConfig::none(),
        }
    }

    /// Log `event` at `level`.
    pub fn on(mut self, event: impl Into<Arc<str>>, level: Level) -> Self {
        let id = self.id.clone();
        self.bindings
            .push(EventBinding::new(event, move |e, _| log_event(&id, level, e)));
        self
    }

    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }
}

impl Handler for LogHandler {
    fn id(&self) -> HandlerId {
        self.id.clone()
    }

    fn bindings(&self) -> &[EventBinding] {
        &self.bindings
    }

    fn config(&self) -> HandlerConfig {
        self.config.clone()
    }
}

fn log_event(handler: &HandlerId, level: Level, event: &Event) {
    let measurement = serde_json::to_string(event.measurement()).unwrap_or_default();
    let metadata = serde_json::to_string(event.metadata()).unwrap_or_default();
    let event = event.name();

    match level {
        Level::ERROR => {
            tracing::error!(%handler, event, %measurement, %metadata, "Telemetry event")
        }
        Level::WARN => {
            tracing::warn!(%handler, event, %measurement, %metadata, "Telemetry event")
        }
        Level::INFO => {
            tracing::info!(%handler, event, %measurement, %metadata, "Telemetry event")
        }
        Level::DEBUG => {
            tracing::debug!(%handler, event, %measurement, %metadata, "Telemetry event")
        }
        _ => tracing::trace!(%handler, event, %measurement, %metadata, "Telemetry event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dispatcher, Measurement, Metadata, SpanOutcome};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn binds_one_callback_per_event() {
        let handler = LogHandler::new("log")
            .on("a", Level::INFO)
            .on("b", Level::ERROR);
        let events: Vec<_> = handler.bindings().iter().map(|b| b.event()).collect();
        assert_eq!(events, vec!["a", "b"]);
        assert_eq!(handler.id().as_str(), "log");
    }

    #[test]
    fn logs_events_and_spans_at_every_level() {
        init_tracing();
        let dispatcher = Dispatcher::default();
        dispatcher
            .add_handler(
                LogHandler::new("log")
                    .on("app.event", Level::INFO)
                    .on("app.event.error", Level::WARN)
                    .on("app.job.start", Level::DEBUG)
                    .on("app.job.end", Level::TRACE)
                    .on("app.job.panic", Level::ERROR)
                    .with_config(HandlerConfig::new("unused")),
            )
            .unwrap();

        dispatcher
            .trigger_event("app.event", Measurement::new(), Metadata::new())
            .unwrap();
        dispatcher
            .trigger_event("app.event.error", Measurement::new(), Metadata::new())
            .unwrap();
        let result = dispatcher
            .trigger_span("app.job", Metadata::new(), || SpanOutcome::<_, ()>::ok("done"))
            .unwrap();
        assert_eq!(result, Ok("done"));
        assert_eq!(dispatcher.stats().panicked, 0);
    }
}
