use alloy_primitives::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ProofRecord;

/// Type tag carried in the leading byte of a preimage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PreimageKeyType {
    /// Data local to the dispute, e.g. the claimed output root.
    Local = 0x01,
    Keccak256 = 0x02,
    GlobalGeneric = 0x03,
    Sha256 = 0x04,
    BlobKzg = 0x05,
    Precompile = 0x06,
}

impl PreimageKeyType {
    /// Returns the type of `key`, or `None` for empty keys and unknown tags.
    pub fn of(key: &[u8]) -> Option<Self> {
        key.first().and_then(|&tag| Self::try_from(tag).ok())
    }

    pub const fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }
}

/// The preimage oracle interaction of a single step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OracleDatum {
    /// Whether the key addresses data local to the dispute rather than
    /// globally content-addressed data.
    pub is_local: bool,
    pub oracle_key: Bytes,
    pub oracle_data: Bytes,
    pub oracle_offset: u32,
}

impl OracleDatum {
    pub fn new(oracle_key: Bytes, oracle_data: Bytes, oracle_offset: u32) -> Self {
        Self {
            is_local: PreimageKeyType::of(&oracle_key).is_some_and(PreimageKeyType::is_local),
            oracle_key,
            oracle_data,
            oracle_offset,
        }
    }

    /// Builds the datum of a proof record. A record without oracle fields
    /// yields an empty datum.
    pub fn from_record(record: &ProofRecord) -> Self {
        match &record.oracle_key {
            Some(key) => Self::new(
                key.clone(),
                record.oracle_value.clone().unwrap_or_default(),
                record.oracle_offset.unwrap_or_default(),
            ),
            None => Self::default(),
        }
    }

    /// Whether the step did not read from the oracle.
    pub fn is_empty(&self) -> bool {
        self.oracle_key.is_empty()
    }

    pub fn key_type(&self) -> Option<PreimageKeyType> {
        PreimageKeyType::of(&self.oracle_key)
    }
}
