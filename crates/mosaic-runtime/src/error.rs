//! Error types for runtime operations

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur in the distributed task runtime
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// A global wait exceeded the configured timeout
    #[error("global wait timed out after {seconds} s on rank {rank}: {pending} pending operation(s)")]
    Timeout {
        seconds: u64,
        rank: usize,
        pending: usize,
    },

    /// A single-assignment future was assigned twice
    #[error("future has already been set")]
    FutureAlreadySet,

    /// A consume-read future was read twice
    #[error("future value was already consumed")]
    FutureTaken,

    /// A task closure panicked; the panic is stored in the task's future
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// Ranks disagreed about the payload type of a collective operation
    #[error("collective payload type mismatch on rank {rank}")]
    CollectiveTypeMismatch { rank: usize },

    /// The world was torn down before the operation could complete
    #[error("world has been torn down")]
    WorldTornDown,

    /// A remote object lookup failed
    #[error("unknown distributed object {id} on rank {rank}")]
    UnknownObject { id: u64, rank: usize },
}
