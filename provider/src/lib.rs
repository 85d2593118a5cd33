//! Trace provider for FPVM fault-proof dispute games.
//!
//! The provider answers, for a single trace index, the queries a dispute game
//! needs: the commitment to the post-state, the preimage oracle interaction
//! of the step and the raw state and proof data used to execute the step
//! on-chain. Proofs are produced lazily by a [`ProofGenerator`] and cached in a
//! trace directory so that each step is generated at most once.
//!
//! Trace directory layout:
//! - `proofs/<step>.json`: one [`ProofRecord`] per generated step.
//! - `final.json`: the terminal state, written when the machine halted before
//!   a requested step.
//! - `snapshots/<step>.json`: intermediate states the generator resumes from.

mod context;
mod error;
pub mod generator;
mod oracle;
mod provider;
mod store;

pub use context::{Cancelled, Context};
pub use error::{ProviderError, Result};
pub use generator::{ExecutorConfig, GeneratorError, ProofGenerator, VmExecutor};
pub use oracle::{OracleDatum, PreimageKeyType};
pub use provider::{ProviderConfig, TraceProvider, DEFAULT_PRE_STATE};
pub use store::{
    ProofRecord, ProofStore, StoreError, FINAL_STATE, PROOFS_DIR, SNAPSHOTS_DIR,
};
