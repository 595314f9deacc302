use std::{
    backtrace::Backtrace,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use crate::{
    Config, Error, Event, Handler, HandlerId, Measurement, Metadata, PoolStats, Result,
    SpanOutcome, WorkerPool,
    internal::{HandlerRegistry, Invocation, panic_message},
    span::{self, derived_name, now_millis},
};

/// Lifecycle of a [`Dispatcher`].
///
/// `Active` from construction (the pool, if any, is already running),
/// `Draining` while [`Dispatcher::shutdown`] waits for the pool, `Stopped`
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DispatcherState {
    Active = 0,
    Draining = 1,
    Stopped = 2,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatcherState::Active,
            1 => DispatcherState::Draining,
            _ => DispatcherState::Stopped,
        }
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Active => write!(f, "Active"),
            DispatcherState::Draining => write!(f, "Draining"),
            DispatcherState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot of a dispatcher's delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Handler invocations dropped because the pool refused them.
    pub dropped: u64,
    /// Handler callbacks that panicked.
    pub panicked: u64,
    /// Pool counters, when concurrent execution is enabled.
    pub pool: Option<PoolStats>,
}

#[derive(Default)]
struct Counters {
    dropped: AtomicU64,
    panicked: AtomicU64,
}

/// Resolves published event names to registered handlers and runs their
/// callbacks.
///
/// - Register handlers with [`add_handler`](Dispatcher::add_handler); a
///   handler with an already registered id replaces the old one.
/// - Publish with [`trigger_event`](Dispatcher::trigger_event), or wrap a unit
///   of work with [`trigger_span`](Dispatcher::trigger_span).
/// - With [`Config::concurrent_execution`] callbacks run on a
///   [`WorkerPool`]; otherwise they run on the publishing thread before
///   `trigger_event` returns.
/// - [`shutdown`](Dispatcher::shutdown) (or drop) waits for in-flight pool
///   work.
///
/// The dispatcher is `Send + Sync`; share it behind an `Arc`. Callbacks may
/// call back into the same dispatcher, since no internal lock is held while
/// they run.
///
/// # Example
///
/// ```rust
/// use pulse::{Dispatcher, EventBinding, Handler, HandlerId, Measurement, Metadata};
///
/// struct Printer(Vec<EventBinding>);
///
/// impl Handler for Printer {
///     fn id(&self) -> HandlerId {
///         "printer".into()
///     }
///     fn bindings(&self) -> &[EventBinding] {
///         &self.0
///     }
/// }
///
/// let dispatcher = Dispatcher::default();
/// dispatcher.add_handler(Printer(vec![EventBinding::new("cache.miss", |event, _| {
///     println!("{} {:?}", event.name(), event.metadata());
/// })]))?;
/// dispatcher.trigger_event("cache.miss", Measurement::new(), Metadata::new())?;
/// # Ok::<(), pulse::Error>(())
/// ```
pub struct Dispatcher {
    config: Config,
    registry: HandlerRegistry,
    pool: Option<WorkerPool>,
    state: AtomicU8,
    stopped: Mutex<bool>,
    stopped_signal: Condvar,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Create a dispatcher, starting its worker pool if concurrent execution
    /// is configured.
    pub fn new(config: Config) -> Result<Self> {
        let pool = if config.concurrent_execution {
            if config.pool_size == 0 {
                tracing::warn!(
                    "Concurrent execution enabled with zero workers: every handler invocation will be dropped"
                );
            }
            let pool = WorkerPool::new(config.pool_size, config.pool_queue_capacity);
            pool.start()?;
            Some(pool)
        } else {
            None
        };
        Ok(Self::with_pool(config, pool))
    }

    fn with_pool(config: Config, pool: Option<WorkerPool>) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            pool,
            state: AtomicU8::new(DispatcherState::Active as u8),
            stopped: Mutex::new(false),
            stopped_signal: Condvar::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register a single handler.
    pub fn add_handler<H: Handler + 'static>(&self, handler: H) -> Result<()> {
        self.add_handlers([Arc::new(handler) as Arc<dyn Handler>])
    }

    /// Register handlers, each replacing any handler with the same id.
    pub fn add_handlers<I>(&self, handlers: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Handler>>,
    {
        self.ensure_active()?;
        for handler in handlers {
            let id = handler.id();
            if self.registry.add(handler).is_some() {
                tracing::debug!(handler = %id, "Handler replaced");
            }
        }
        Ok(())
    }

    /// Unregister `handler` by its id.
    pub fn remove_handler<H: Handler + ?Sized>(&self, handler: &H) -> Result<()> {
        self.remove_handlers([handler.id()])
    }

    /// Unregister handlers by id. Unknown ids are ignored.
    ///
    /// Invocations already resolved for a removed handler may still run.
    pub fn remove_handlers<I>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<HandlerId>,
    {
        self.ensure_active()?;
        for id in ids {
            self.registry.remove(&id.into());
        }
        Ok(())
    }

    pub fn is_registered(&self, id: impl Into<HandlerId>) -> bool {
        self.registry.contains(&id.into())
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Publish an event to every binding registered for `name`.
    ///
    /// No matching binding is not an error. In synchronous mode every callback
    /// has returned when this does; in concurrent mode callbacks are queued
    /// and an invocation the pool refuses is dropped (see
    /// [`DispatchStats::dropped`]). Handler panics never reach the caller.
    pub fn trigger_event(
        &self,
        name: &str,
        measurement: Measurement,
        metadata: Metadata,
    ) -> Result<()> {
        self.ensure_active()?;
        self.dispatch(name, measurement, metadata);
        Ok(())
    }

    /// Run `body` on the calling thread, reporting it as a span.
    ///
    /// 1. `<name>.start` is published with `{start_time}` and `metadata`.
    /// 2. `body` runs.
    /// 3. On return, `<name>.end` is published with the body's measurement
    ///    plus `{duration, end_time}` and the body's metadata; the body's
    ///    result is returned as the inner `Result`.
    /// 4. If `body` panics, `<name>.panic` is published with
    ///    `{error, errorTime, stackTrace}` metadata and the panic is resumed.
    ///    `<name>.end` is not published in that case.
    ///
    /// The outer `Result` only reports dispatcher errors. The span events
    /// themselves are published synchronously; their callbacks follow the
    /// dispatcher's execution mode.
    pub fn trigger_span<T, E, F>(
        &self,
        name: &str,
        metadata: Metadata,
        body: F,
    ) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce() -> SpanOutcome<T, E>,
    {
        self.ensure_active()?;

        let start_time = now_millis();
        let mut measurement = Measurement::new();
        measurement.insert(span::START_TIME.into(), start_time.into());
        self.dispatch(&derived_name(name, span::START_SUFFIX), measurement, metadata);

        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(SpanOutcome {
                result,
                mut measurement,
                metadata,
            }) => {
                let end_time = now_millis();
                measurement.insert(
                    span::DURATION.into(),
                    end_time.saturating_sub(start_time).into(),
                );
                measurement.insert(span::END_TIME.into(), end_time.into());
                self.dispatch(&derived_name(name, span::END_SUFFIX), measurement, metadata);
                Ok(result)
            }
            Err(payload) => {
                let mut metadata = Metadata::new();
                metadata.insert(span::ERROR.into(), panic_message(payload.as_ref()).into());
                metadata.insert(span::ERROR_TIME.into(), now_millis().into());
                metadata.insert(
                    span::STACK_TRACE.into(),
                    Backtrace::force_capture().to_string().into(),
                );
                self.dispatch(
                    &derived_name(name, span::PANIC_SUFFIX),
                    Measurement::new(),
                    metadata,
                );
                resume_unwind(payload)
            }
        }
    }

    /// Stop the dispatcher, waiting for all accepted pool work to finish.
    ///
    /// Subsequent operations fail with [`Error::DispatcherNotActive`].
    /// Calling it again (or dropping the dispatcher) is a no-op. A call made
    /// while another thread is draining waits until the dispatcher is
    /// `Stopped`, unless it comes from a pool worker, which can't wait for
    /// its own pool and returns at once.
    pub fn shutdown(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                DispatcherState::Active as u8,
                DispatcherState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            if !self.on_pool_worker() {
                self.wait_until_stopped();
            }
            return Ok(());
        }
        tracing::debug!("Dispatcher draining");

        let result = match &self.pool {
            Some(pool) => pool.stop(),
            None => Ok(()),
        };

        self.state
            .store(DispatcherState::Stopped as u8, Ordering::SeqCst);
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.stopped_signal.notify_all();
        tracing::debug!(stats = ?self.stats(), "Dispatcher stopped");
        result
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            pool: self.pool.as_ref().map(WorkerPool::stats),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn on_pool_worker(&self) -> bool {
        self.pool.as_ref().is_some_and(WorkerPool::is_worker_thread)
    }

    fn wait_until_stopped(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            stopped = self
                .stopped_signal
                .wait(stopped)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            DispatcherState::Active => Ok(()),
            state => Err(Error::DispatcherNotActive(state)),
        }
    }

    fn dispatch(&self, name: &str, measurement: Measurement, metadata: Metadata) {
        let invocations = self.registry.resolve(name);
        tracing::trace!(event = name, bindings = invocations.len(), "Dispatching event");
        if invocations.is_empty() {
            return;
        }

        let event = Arc::new(Event::new(name, measurement, metadata));
        match &self.pool {
            Some(pool) => {
                for invocation in invocations {
                    self.submit(pool, invocation, event.clone());
                }
            }
            None => {
                for invocation in invocations {
                    if !invocation.run(&event) {
                        self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    fn submit(&self, pool: &WorkerPool, invocation: Invocation, event: Arc<Event>) {
        let handler_id = invocation.handler_id.clone();
        let counters = self.counters.clone();
        let e = event.clone();
        let accepted = pool.submit(move || {
            if !invocation.run(&e) {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
            }
        });

        if !accepted {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                handler = %handler_id,
                event = %event.name(),
                "Pool rejected handler invocation, dropping it"
            );
        }
    }
}

impl Default for Dispatcher {
    /// A synchronous dispatcher with no worker pool.
    fn default() -> Self {
        Self::with_pool(Config::default(), None)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "Dispatcher shutdown failed on drop");
        }
    }
}
