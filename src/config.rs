use serde::{Deserialize, Serialize};

/// Construction-time options of a [`Dispatcher`](crate::Dispatcher).
///
/// The dispatcher copies the config on construction; changing it afterwards
/// has no effect. Use the builder methods to customize, or [`Default`] for a
/// purely synchronous dispatcher.
///
/// # Examples
///
/// ```rust
/// use pulse::Config;
///
/// let config = Config::default()
///     .with_concurrent_execution(true)
///     .with_pool_size(4)               // Four worker threads
///     .with_pool_queue_capacity(64);   // Up to 64 pending invocations
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run handler callbacks on a worker pool instead of the caller's thread.
    /// Default: false
    pub concurrent_execution: bool,

    /// Number of worker threads. Only meaningful with `concurrent_execution`.
    /// Default: 0
    pub pool_size: usize,

    /// Number of invocations that may wait for a free worker. Submissions
    /// beyond this are dropped. Zero is treated as one.
    /// Default: 0
    pub pool_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            concurrent_execution: false,
            pool_size: 0,
            pool_queue_capacity: 0,
        }
    }
}

impl Config {
    /// Shorthand for a pool-backed configuration.
    pub fn concurrent(pool_size: usize, pool_queue_capacity: usize) -> Self {
        Config {
            concurrent_execution: true,
            pool_size,
            pool_queue_capacity,
        }
    }

    /// Select synchronous or pool-backed handler execution.
    pub fn with_concurrent_execution(mut self, enabled: bool) -> Self {
        self.concurrent_execution = enabled;
        self
    }

    /// Set the number of pool workers.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the bounded queue capacity of the pool.
    ///
    /// When the queue is full, further handler invocations are dropped
    /// rather than blocking the publisher.
    pub fn with_pool_queue_capacity(mut self, capacity: usize) -> Self {
        self.pool_queue_capacity = capacity;
        self
    }
}
