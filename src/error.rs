use crate::DispatcherState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Worker pool has already started.")]
    PoolAlreadyStarted,

    #[error("Worker pool can't be stopped from one of its own workers.")]
    StopFromWorker,

    #[error("Dispatcher is not active (current state: {0}).")]
    DispatcherNotActive(DispatcherState),

    #[error("Couldn't spawn a pool worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}
