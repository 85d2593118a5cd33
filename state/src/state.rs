use std::io::Read;

use alloy_primitives::B256;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::{StateError, NUM_REGISTERS};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The state of the machine after a given number of executed steps.
///
/// Memory contents are not part of the snapshot: only the root of the memory
/// Merkle tree is kept, which is all the witness needs. Unknown JSON fields
/// are ignored so that newer writers stay readable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmState {
    /// Merkle root of the memory.
    pub mem_root: B256,
    /// Key of the preimage currently being read.
    pub preimage_key: B256,
    /// Read offset into the current preimage.
    pub preimage_offset: u32,
    pub pc: u32,
    #[serde(rename = "nextPC")]
    pub next_pc: u32,
    pub lo: u32,
    pub hi: u32,
    pub heap: u32,
    #[serde(rename = "exit")]
    pub exit_code: u8,
    pub exited: bool,
    /// Number of steps executed to reach this state.
    pub step: u64,
    pub registers: [u32; NUM_REGISTERS],
}

impl VmState {
    /// Decodes a state from its JSON form, inflating it first if it is
    /// gzip-compressed, and checks that it is well formed.
    pub fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        let state: Self = if bytes.starts_with(&GZIP_MAGIC) {
            let mut json = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut json)
                .map_err(StateError::Gzip)?;
            serde_json::from_slice(&json)?
        } else {
            serde_json::from_slice(bytes)?
        };

        state.validate()?;
        Ok(state)
    }

    /// Encodes the state as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Checks the consistency of the exit fields.
    pub fn validate(&self) -> Result<(), StateError> {
        if !self.exited && self.exit_code != 0 {
            return Err(StateError::ExitCodeWithoutExit(self.exit_code));
        }
        Ok(())
    }
}
