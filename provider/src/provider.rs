//! Resolution of trace queries against the proof cache.

use std::path::{Path, PathBuf};

use alloy_primitives::{Bytes, B256};
use fpvm_state::{StateWitness, VmState};
use serde::Deserialize;
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, instrument, warn};

use crate::{
    Context, GeneratorError, OracleDatum, ProofGenerator, ProofRecord, ProofStore, ProviderError,
    Result, StoreError,
};

/// Default file name of the absolute pre-state, relative to the trace
/// directory.
pub const DEFAULT_PRE_STATE: &str = "state.json";

/// Location of a trace on disk.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderConfig {
    /// Trace directory.
    pub dir: PathBuf,
    /// Absolute pre-state file, relative to `dir` unless absolute.
    #[serde(default = "default_pre_state")]
    pub pre_state: PathBuf,
}

fn default_pre_state() -> PathBuf {
    PathBuf::from(DEFAULT_PRE_STATE)
}

impl ProviderConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pre_state: default_pre_state(),
        }
    }

    pub fn with_pre_state(mut self, pre_state: impl Into<PathBuf>) -> Self {
        self.pre_state = pre_state.into();
        self
    }
}

/// What a query needs from the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
enum Query {
    Commitment,
    OracleData,
    Preimage,
}

impl Query {
    /// Only the commitment can be read off the terminal state: the other
    /// queries need the transition that led to it.
    const fn accepts_terminal(self) -> bool {
        matches!(self, Self::Commitment)
    }
}

/// What answers a query once resolved.
#[derive(Debug)]
enum Resolved {
    /// The proof of the step at `index`, which may differ from the requested
    /// one if the requested step lies past the end of the trace.
    StepProof { index: u64, record: ProofRecord },
    /// The requested step lies at or after the halting step.
    TerminalState(VmState),
}

/// Serves trace queries from a trace directory, generating proofs on a cache
/// miss.
///
/// The provider holds no state besides its configuration: every call goes to
/// disk, so several providers, possibly in different processes, can serve the
/// same directory.
#[derive(Debug)]
pub struct TraceProvider<G> {
    store: ProofStore,
    pre_state: PathBuf,
    generator: G,
}

impl<G: ProofGenerator> TraceProvider<G> {
    pub fn new(config: ProviderConfig, generator: G) -> Self {
        Self {
            store: ProofStore::new(config.dir),
            pre_state: config.pre_state,
            generator,
        }
    }

    pub fn store(&self) -> &ProofStore {
        &self.store
    }

    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    /// Returns the commitment to the post-state of step `index`.
    #[instrument(level = "debug", skip(self, ctx))]
    pub fn get(&self, ctx: &Context, index: u64) -> Result<B256> {
        match self.resolve(ctx, index, Query::Commitment)? {
            Resolved::TerminalState(state) => Ok(state.encode_witness().commitment()),
            Resolved::StepProof { index, record } => record
                .claim_value
                .ok_or(ProviderError::MissingCommitment(index)),
        }
    }

    /// Returns the preimage oracle interaction of step `index`. Steps that do
    /// not read from the oracle yield an empty datum.
    #[instrument(level = "debug", skip(self, ctx))]
    pub fn get_oracle_data(&self, ctx: &Context, index: u64) -> Result<OracleDatum> {
        let (_, record) = self.resolve_step(ctx, index, Query::OracleData)?;
        Ok(OracleDatum::from_record(&record))
    }

    /// Returns the encoded state and memory proofs needed to execute step
    /// `index`.
    #[instrument(level = "debug", skip(self, ctx))]
    pub fn get_preimage(&self, ctx: &Context, index: u64) -> Result<(Bytes, Bytes)> {
        let (index, record) = self.resolve_step(ctx, index, Query::Preimage)?;
        let state_data = record
            .state_data
            .ok_or(ProviderError::MissingStateData(index))?;
        Ok((state_data, record.proof_data))
    }

    /// Returns the commitment to the genesis state of the trace.
    #[instrument(level = "debug", skip_all)]
    pub fn absolute_pre_state(&self, ctx: &Context) -> Result<B256> {
        Ok(self.absolute_pre_state_witness(ctx)?.commitment())
    }

    /// Returns the witness of the genesis state of the trace.
    pub fn absolute_pre_state_witness(&self, ctx: &Context) -> Result<StateWitness> {
        ctx.check()?;
        let state = self
            .store
            .read_state(&self.pre_state)
            .map_err(|err| match err {
                StoreError::Io { path, source } => {
                    ProviderError::PreStateUnavailable { path, source }
                }
                StoreError::State { path, source } => {
                    ProviderError::PreStateInvalid { path, source }
                }
                other => other.into(),
            })?;
        Ok(state.encode_witness())
    }

    fn resolve_step(&self, ctx: &Context, index: u64, query: Query) -> Result<(u64, ProofRecord)> {
        match self.resolve(ctx, index, query)? {
            Resolved::StepProof { index, record } => Ok((index, record)),
            Resolved::TerminalState(_) => {
                unreachable!("terminal state resolved for a {query} query")
            }
        }
    }

    /// Finds the record answering `query` for step `index`, generating it if
    /// needed.
    ///
    /// At most one generation is attempted for the requested step, plus one
    /// for the last step of the trace if the first attempt reveals the
    /// requested step is past the end of the trace.
    fn resolve(&self, ctx: &Context, index: u64, query: Query) -> Result<Resolved> {
        let mut index = index;

        if let Some(terminal) = self.halted_at_or_before(ctx, index)? {
            if query.accepts_terminal() {
                debug!(index, step = terminal.step, "answering from terminal state");
                return Ok(Resolved::TerminalState(terminal));
            }
            index = last_transition(&terminal)?;
        }

        if let Some(record) = self.read_proof(ctx, index)? {
            return Ok(Resolved::StepProof { index, record });
        }

        self.generate(ctx, index)?;

        if let Some(terminal) = self.halted_at_or_before(ctx, index)? {
            if query.accepts_terminal() {
                return Ok(Resolved::TerminalState(terminal));
            }
            warn!(
                query = %query,
                requested = index,
                last = terminal.step,
                "requested step is past the end of the trace"
            );
            index = last_transition(&terminal)?;
            if let Some(record) = self.read_proof(ctx, index)? {
                return Ok(Resolved::StepProof { index, record });
            }
            self.generate(ctx, index)?;
        }

        match self.read_proof(ctx, index)? {
            Some(record) => Ok(Resolved::StepProof { index, record }),
            None => {
                let terminal = self.store.read_terminal()?;
                Err(ProviderError::GenerationFailed {
                    index,
                    source: GeneratorError::MissingOutput {
                        final_step: terminal.as_ref().map(|state| state.step),
                        exited: terminal.is_some_and(|state| state.exited),
                    },
                })
            }
        }
    }

    /// Returns the terminal state if the trace halted at or before `index`.
    fn halted_at_or_before(&self, ctx: &Context, index: u64) -> Result<Option<VmState>> {
        ctx.check()?;
        match self.store.read_terminal()? {
            Some(state) if state.exited => Ok((index >= state.step).then_some(state)),
            Some(state) => {
                warn!(step = state.step, "ignoring final state that has not exited");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn read_proof(&self, ctx: &Context, index: u64) -> Result<Option<ProofRecord>> {
        ctx.check()?;
        Ok(self.store.read_proof(index)?)
    }

    fn generate(&self, ctx: &Context, index: u64) -> Result<()> {
        ctx.check()?;
        info!(index, dir = %self.dir().display(), "generating proof");
        self.generator
            .generate_proof(ctx, self.dir(), index)
            .map_err(|err| match err {
                GeneratorError::Cancelled(cancelled) => cancelled.into(),
                source => ProviderError::GenerationFailed { index, source },
            })
    }
}

/// The last step with a transition, i.e. the one that produced `terminal`.
fn last_transition(terminal: &VmState) -> Result<u64> {
    terminal.step.checked_sub(1).ok_or(ProviderError::EmptyTrace)
}
