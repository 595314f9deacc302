//! Pulse, an in-process telemetry event bus.
//!
//! Code publishes named events (`"order.created"`, `"db.query.end"`) carrying
//! a measurement map and a metadata map; handlers register callbacks for the
//! names they care about. Delivery is either synchronous on the publishing
//! thread or handed to a bounded [`WorkerPool`].
//!
//! ```rust
//! use pulse::{Config, Dispatcher, LogHandler, Measurement, Metadata, SpanOutcome};
//! use tracing::Level;
//!
//! let dispatcher = Dispatcher::new(Config::concurrent(4, 256))?;
//! dispatcher.add_handler(
//!     LogHandler::new("log")
//!         .on("cache.miss", Level::INFO)
//!         .on("report.end", Level::INFO),
//! )?;
//!
//! dispatcher.trigger_event("cache.miss", Measurement::new(), Metadata::new())?;
//! let rows = dispatcher.trigger_span("report", Metadata::new(), || {
//!     SpanOutcome::<_, ()>::ok(42).with_measurement("rows", 42)
//! })?;
//! assert_eq!(rows, Ok(42));
//!
//! dispatcher.shutdown()?;
//! # Ok::<(), pulse::Error>(())
//! ```

mod config;
mod dispatcher;
mod error;
mod event;
mod handler;
mod handlers;
mod internal;
mod pool;

pub mod span;

#[cfg(feature = "test-harness")]
pub mod testing;

pub use config::Config;
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherState};
pub use error::Error;
pub use event::{Event, Measurement, Metadata};
pub use handler::{Callback, EventBinding, Handler, HandlerConfig, HandlerId};
pub use handlers::LogHandler;
pub use pool::{PoolStats, WorkerPool};
pub use span::SpanOutcome;

pub type Result<T = ()> = std::result::Result<T, Error>;

/// Unique identifier of a single event occurrence.
pub type EventId = u128;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dispatcher::Dispatcher;
    pub use crate::error::Error as PulseError;
    pub use crate::event::{Event, Measurement, Metadata};
    pub use crate::handler::{EventBinding, Handler, HandlerConfig, HandlerId};
    pub use crate::span::SpanOutcome;
}
