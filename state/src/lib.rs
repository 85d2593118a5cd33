//! Machine state snapshots for the FPVM.
//!
//! A [`VmState`] is the full register-level state of the machine at a given
//! step, with memory represented by its Merkle root. States are persisted as
//! JSON (optionally gzip-compressed) and committed to on-chain through their
//! [`StateWitness`]: a fixed-layout binary encoding whose keccak-256 hash is
//! the state's commitment.

mod error;
mod state;
mod witness;

pub use error::StateError;
pub use state::VmState;
pub use witness::{StateWitness, STATE_WITNESS_SIZE};

/// Number of general purpose registers of the machine.
pub const NUM_REGISTERS: usize = 32;
