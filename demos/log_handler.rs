use std::{panic::AssertUnwindSafe, time::Duration};

use pulse::{Config, Dispatcher, LogHandler, Measurement, Metadata, SpanOutcome};
use serde_json::json;
use tracing::Level;

fn main() -> pulse::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_thread_names(true)
        .init();

    let dispatcher = Dispatcher::new(Config::concurrent(2, 16))?;
    dispatcher.add_handler(
        LogHandler::new("console")
            .on("cache.miss", Level::INFO)
            .on("report.start", Level::DEBUG)
            .on("report.end", Level::INFO)
            .on("report.panic", Level::ERROR),
    )?;

    for key in ["user:1", "user:2", "user:3"] {
        let mut measurement = Measurement::new();
        measurement.insert("lookup_us".into(), json!(120));
        let mut metadata = Metadata::new();
        metadata.insert("key".into(), json!(key));
        dispatcher.trigger_event("cache.miss", measurement, metadata)?;
    }

    let mut metadata = Metadata::new();
    metadata.insert("format".into(), json!("csv"));
    let rows = dispatcher.trigger_span("report", metadata, || {
        std::thread::sleep(Duration::from_millis(25));
        SpanOutcome::<usize, String>::ok(3)
            .with_measurement("rows", 3)
            .with_metadata("status", "ok")
    })?;
    tracing::info!(?rows, "Report finished");

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        dispatcher.trigger_span("report", Metadata::new(), || -> SpanOutcome<(), ()> {
            panic!("disk full")
        })
    }));
    tracing::info!(panicked = result.is_err(), "Second report finished");

    dispatcher.shutdown()?;
    tracing::info!(stats = ?dispatcher.stats(), "Done");
    Ok(())
}
