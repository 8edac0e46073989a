//! Crate-wide error type and `Result` alias.
//!
//! Every fallible operation in the engine returns [`Result<T>`]. I/O errors
//! are wrapped transparently; everything else is a domain error with enough
//! context for the server layer to map it onto a wire response.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying file or socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A log frame could not be decoded at the given position.
    #[error("corrupt log frame: {0}")]
    Corrupt(String),

    /// The key is not present in the store.
    #[error("key not found")]
    NotFound,

    /// A vector's length does not match the store dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The transaction id is unknown or already terminated.
    #[error("no such transaction: {0}")]
    NoSuchTransaction(u64),

    /// The CAS precondition did not hold, or the round was rejected.
    #[error("cas failed: {0}")]
    CasFailed(String),

    /// Fewer than a majority of acceptors answered a Paxos phase.
    #[error("no quorum: {acks}/{needed} acceptors")]
    NoQuorum { acks: usize, needed: usize },

    /// A higher ballot was observed during a Paxos round.
    #[error("preempted by ballot ({epoch}, {node})")]
    Preempted { epoch: u64, node: u32 },

    /// Malformed caller input (empty key, bad vector literal, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A write was attempted on a read-only replica.
    #[error("read-only replica")]
    ReadOnly,
}
