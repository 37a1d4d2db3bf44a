use thiserror::Error;

/// Result of any heap operation that can fail.
pub type HeapResult<T> = Result<T, HeapError>;

/// Heap errors.
///
/// Only allocation failures are reported through this type. Contract
/// violations (bad indices, foreign offsets) are not detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("Out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Address space cannot grow by {pages} pages: {reason}")]
    GrowthFailed { pages: u32, reason: &'static str },

    #[error("Failed to reserve {bytes} bytes of address space")]
    ReserveFailed { bytes: usize },

    #[error("Invalid heap configuration: {0}")]
    InvalidConfig(String),

    #[error("Heap corruption detected at 0x{0:x}")]
    CorruptionDetected(u32),
}
