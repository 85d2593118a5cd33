//! On-disk cache of generated proofs.
//!
//! Records are write-once: they are written to a temporary file next to their
//! final location and published with a rename that never replaces an existing
//! file, so readers only ever observe complete records or none at all.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use alloy_primitives::{Bytes, B256};
use fpvm_state::{StateError, VmState};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Directory holding one proof record per generated step.
pub const PROOFS_DIR: &str = "proofs";
/// File holding the terminal state of the trace.
pub const FINAL_STATE: &str = "final.json";
/// Directory holding intermediate snapshots.
pub const SNAPSHOTS_DIR: &str = "snapshots";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A proof record is present but cannot be decoded.
    #[error("failed to read proof {}: {source}", .path.display())]
    Proof {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record cannot be encoded for publishing.
    #[error("failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: StateError,
    },

    /// A state file is present but does not hold a well formed state.
    #[error("failed to read state {}: {source}", .path.display())]
    State {
        path: PathBuf,
        #[source]
        source: StateError,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The proof generated for a single step of the trace.
///
/// Only the fields known to this reader are decoded, anything else in the
/// file is dropped. Fields required by a given query are validated by the
/// query itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    /// Commitment to the post-state of the step.
    #[serde(rename = "post", default, skip_serializing_if = "Option::is_none")]
    pub claim_value: Option<B256>,
    /// Encoded state the step is executed from.
    #[serde(rename = "state-data", default, skip_serializing_if = "Option::is_none")]
    pub state_data: Option<Bytes>,
    /// Memory proofs accompanying `state_data`.
    #[serde(rename = "proof-data", default)]
    pub proof_data: Bytes,
    #[serde(rename = "oracle-key", default, skip_serializing_if = "Option::is_none")]
    pub oracle_key: Option<Bytes>,
    #[serde(rename = "oracle-value", default, skip_serializing_if = "Option::is_none")]
    pub oracle_value: Option<Bytes>,
    #[serde(rename = "oracle-offset", default, skip_serializing_if = "Option::is_none")]
    pub oracle_offset: Option<u32>,
}

/// Reads and publishes the records of a single trace directory.
#[derive(Clone, Debug)]
pub struct ProofStore {
    dir: PathBuf,
}

impl ProofStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn proof_path(&self, step: u64) -> PathBuf {
        self.dir.join(PROOFS_DIR).join(format!("{step}.json"))
    }

    pub fn terminal_path(&self) -> PathBuf {
        self.dir.join(FINAL_STATE)
    }

    /// Reads the proof record of `step`, or `None` if it was not generated
    /// yet.
    pub fn read_proof(&self, step: u64) -> Result<Option<ProofRecord>, StoreError> {
        let path = self.proof_path(step);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Proof { path, source })
    }

    /// Reads the terminal state of the trace, or `None` if none was written.
    pub fn read_terminal(&self) -> Result<Option<VmState>, StoreError> {
        let path = self.terminal_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        VmState::decode(&bytes)
            .map(Some)
            .map_err(|source| StoreError::State { path, source })
    }

    /// Reads the state stored at `file`, relative to the trace directory
    /// unless absolute.
    ///
    /// A missing file surfaces as [`StoreError::Io`] with
    /// [`io::ErrorKind::NotFound`], a malformed one as [`StoreError::State`].
    pub fn read_state(&self, file: &Path) -> Result<VmState, StoreError> {
        let path = self.dir.join(file);
        let bytes = fs::read(&path).map_err(|err| StoreError::io(&path, err))?;
        VmState::decode(&bytes).map_err(|source| StoreError::State { path, source })
    }

    /// Publishes the proof record of `step`. Returns `false` if a record was
    /// already present, in which case it is left untouched.
    pub fn write_proof(&self, step: u64, record: &ProofRecord) -> Result<bool, StoreError> {
        let path = self.proof_path(step);
        let bytes = serde_json::to_vec(record).map_err(|err| StoreError::Encode {
            path: path.clone(),
            source: err.into(),
        })?;
        publish(&path, &bytes)
    }

    /// Publishes an already encoded proof record of `step`.
    pub fn publish_proof_bytes(&self, step: u64, bytes: &[u8]) -> Result<bool, StoreError> {
        publish(&self.proof_path(step), bytes)
    }

    /// Publishes the terminal state. Returns `false` if one was already
    /// present, in which case it is left untouched.
    pub fn write_terminal(&self, state: &VmState) -> Result<bool, StoreError> {
        let path = self.terminal_path();
        let bytes = state.to_json().map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        publish(&path, &bytes)
    }

    /// Publishes an already encoded terminal state.
    pub fn publish_terminal_bytes(&self, bytes: &[u8]) -> Result<bool, StoreError> {
        publish(&self.terminal_path(), bytes)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn publish(path: &Path, bytes: &[u8]) -> Result<bool, StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| StoreError::io(parent, err))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| StoreError::io(tmp.path(), err))?;

    match tmp.persist_noclobber(path) {
        Ok(_) => {
            debug!(path = %path.display(), "published record");
            Ok(true)
        }
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "record already published");
            Ok(false)
        }
        Err(err) => Err(StoreError::io(path, err.error)),
    }
}
