use std::fmt;

use alloy_primitives::{keccak256, Bytes, B256};

use crate::{VmState, NUM_REGISTERS};

/// Size in bytes of an encoded [`StateWitness`].
pub const STATE_WITNESS_SIZE: usize = 32 + 32 + 4 * 6 + 1 + 1 + 8 + 4 * NUM_REGISTERS;

/// The binary encoding of a [`VmState`], hashed to obtain its commitment.
///
/// Layout, with all integers big-endian:
///
/// | field             | bytes |
/// |-------------------|-------|
/// | memory root       | 32    |
/// | preimage key      | 32    |
/// | preimage offset   | 4     |
/// | pc, next pc       | 4 + 4 |
/// | lo, hi, heap      | 4 × 3 |
/// | exit code, exited | 1 + 1 |
/// | step              | 8     |
/// | registers         | 4 × 32|
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StateWitness([u8; STATE_WITNESS_SIZE]);

impl StateWitness {
    /// Returns the keccak-256 commitment to the witness.
    pub fn commitment(&self) -> B256 {
        keccak256(self.0)
    }

    pub const fn as_bytes(&self) -> &[u8; STATE_WITNESS_SIZE] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.0)
    }
}

impl AsRef<[u8]> for StateWitness {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for StateWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateWitness({:?})", self.to_bytes())
    }
}

struct WitnessWriter {
    buf: [u8; STATE_WITNESS_SIZE],
    pos: usize,
}

impl WitnessWriter {
    const fn new() -> Self {
        Self {
            buf: [0; STATE_WITNESS_SIZE],
            pos: 0,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn finish(self) -> StateWitness {
        debug_assert_eq!(self.pos, STATE_WITNESS_SIZE);
        StateWitness(self.buf)
    }
}

impl VmState {
    /// Encodes the state into its witness.
    pub fn encode_witness(&self) -> StateWitness {
        let mut w = WitnessWriter::new();
        w.put(self.mem_root.as_slice());
        w.put(self.preimage_key.as_slice());
        w.put(&self.preimage_offset.to_be_bytes());
        w.put(&self.pc.to_be_bytes());
        w.put(&self.next_pc.to_be_bytes());
        w.put(&self.lo.to_be_bytes());
        w.put(&self.hi.to_be_bytes());
        w.put(&self.heap.to_be_bytes());
        w.put(&[self.exit_code, u8::from(self.exited)]);
        w.put(&self.step.to_be_bytes());
        for reg in self.registers {
            w.put(&reg.to_be_bytes());
        }
        w.finish()
    }
}
