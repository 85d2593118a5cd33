//! Gateway to the external trace generator.

mod executor;

use std::{path::Path, process::ExitStatus, sync::Arc};

use thiserror::Error;

pub use self::executor::{
    ExecutorConfig, VmExecutor, DEFAULT_INFO_FREQ, DEFAULT_SNAPSHOT_FREQ,
};
use crate::{Cancelled, Context, StoreError};

/// Produces proof records into a trace directory.
///
/// A successful call for step `i` leaves either the proof record of `i` or a
/// terminal state with `step <= i` in `dir`. Implementations do not cache:
/// callers only invoke them on a miss. Records must be published atomically,
/// since concurrent callers may generate the same step.
pub trait ProofGenerator: Send + Sync {
    fn generate_proof(&self, ctx: &Context, dir: &Path, step: u64) -> Result<(), GeneratorError>;
}

impl<T: ProofGenerator + ?Sized> ProofGenerator for Arc<T> {
    fn generate_proof(&self, ctx: &Context, dir: &Path, step: u64) -> Result<(), GeneratorError> {
        (**self).generate_proof(ctx, dir, step)
    }
}

impl<T: ProofGenerator + ?Sized> ProofGenerator for Box<T> {
    fn generate_proof(&self, ctx: &Context, dir: &Path, step: u64) -> Result<(), GeneratorError> {
        (**self).generate_proof(ctx, dir, step)
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("failed to run {}: {source}", .bin.display())]
    Spawn {
        bin: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vm exited with {0}")]
    Failed(ExitStatus),

    /// The generator returned successfully but left neither the proof nor a
    /// terminal state covering the step.
    #[error("proof not generated (final state: {})", describe_final(.final_step, .exited))]
    MissingOutput {
        final_step: Option<u64>,
        exited: bool,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn describe_final(final_step: &Option<u64>, exited: &bool) -> String {
    match final_step {
        Some(step) if *exited => format!("exited at step {step}"),
        Some(step) => format!("running at step {step}"),
        None => "absent".to_string(),
    }
}
