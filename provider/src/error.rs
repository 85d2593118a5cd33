//! Error types for the trace provider.

use std::{io, path::PathBuf};

use fpvm_state::StateError;
use thiserror::Error;

use crate::{Cancelled, GeneratorError, StoreError};

/// Errors returned by trace queries.
///
/// None of them is retried internally.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The proof of the step has no post-state commitment.
    #[error("proof at step {0} missing post hash")]
    MissingCommitment(u64),

    /// The proof of the step has no state data.
    #[error("proof at step {0} missing state data")]
    MissingStateData(u64),

    /// The generator failed, or did not produce the expected record.
    #[error("failed to generate proof at step {index}: {source}")]
    GenerationFailed {
        index: u64,
        #[source]
        source: GeneratorError,
    },

    /// The absolute pre-state file cannot be read.
    #[error("absolute pre-state {} unavailable: {source}", .path.display())]
    PreStateUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The absolute pre-state file does not hold a well formed state.
    #[error("invalid vm state in {}: {source}", .path.display())]
    PreStateInvalid {
        path: PathBuf,
        #[source]
        source: StateError,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The trace halted on its genesis state, so there is no step transition
    /// to take oracle or preimage data from.
    #[error("trace halted at step 0, no step transition exists")]
    EmptyTrace,

    /// A cached record is present but cannot be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type of trace queries.
pub type Result<T> = std::result::Result<T, ProviderError>;
