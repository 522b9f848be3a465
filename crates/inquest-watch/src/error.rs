use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch root {} does not exist or is not a directory", .0.display())]
    RootMissing(PathBuf),
    #[error("watch service error: {0}")]
    Notify(#[from] notify::Error),
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("worker pool is closed")]
    PoolClosed,
    #[error("worker pool is saturated ({capacity} jobs queued)")]
    PoolSaturated { capacity: usize },
    #[error("watcher thread panicked")]
    ConsumerPanicked,
}
