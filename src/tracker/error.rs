//! Unified error type for the bridging layer.
//!
//! Dispatcher methods never fail synchronously; every error surfaces through
//! the returned future (or as a logged diagnostic on fire-and-forget paths).

use thiserror::Error;

/// Errors a bridged call can settle with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// A positional target did not correspond to any registered counter.
    #[error("no counter registered at position {position} (set has {len})")]
    UnknownTarget {
        /// The positional index that was requested.
        position: usize,
        /// The number of registered counters.
        len: usize,
    },

    /// The call queue was dropped before the call executed.
    #[error("call queue dropped before the call executed")]
    Disconnected,
}

/// Result type for bridged call outcomes.
pub type Result<T> = std::result::Result<T, TrackerError>;
