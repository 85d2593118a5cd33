#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use fpvm_provider::{
    Context, GeneratorError, ProofGenerator, ProofRecord, ProofStore, ProviderConfig,
    TraceProvider, PROOFS_DIR,
};
use fpvm_state::VmState;
use tempfile::TempDir;

pub const PRE_STATE: &str = "state.json";

fn testdata(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/testdata")
        .join(path)
}

/// Creates a trace directory populated with the proofs in
/// `tests/testdata/proofs`.
pub fn setup_trace_dir() -> TempDir {
    let dir = TempDir::new().expect("create trace dir");
    let proofs = dir.path().join(PROOFS_DIR);
    fs::create_dir(&proofs).expect("create proofs dir");
    for entry in fs::read_dir(testdata(PROOFS_DIR)).expect("read testdata") {
        let entry = entry.expect("read testdata entry");
        fs::copy(entry.path(), proofs.join(entry.file_name())).expect("copy proof");
    }
    dir
}

/// Copies `tests/testdata/<file>` to the pre-state location of `dir`.
pub fn setup_pre_state(dir: &Path, file: &str) {
    fs::copy(testdata(file), dir.join(PRE_STATE)).expect("copy pre-state");
}

pub fn setup_provider(
    dir: &Path,
    generator: StubGenerator,
) -> (TraceProvider<Arc<StubGenerator>>, Arc<StubGenerator>) {
    let generator = Arc::new(generator);
    let config = ProviderConfig::new(dir).with_pre_state(PRE_STATE);
    (TraceProvider::new(config, generator.clone()), generator)
}

/// A halted state at `step`.
pub fn final_state(step: u64) -> VmState {
    VmState {
        step,
        exited: true,
        ..Default::default()
    }
}

/// Generator recording the steps it was asked for.
///
/// Mimics the VM: writes `final_state` if it is at or before the requested
/// step, otherwise `proof` if set.
#[derive(Debug, Default)]
pub struct StubGenerator {
    generated: Mutex<Vec<u64>>,
    final_state: Option<VmState>,
    proof: Option<ProofRecord>,
    fail: bool,
}

impl StubGenerator {
    pub fn with_final_state(mut self, state: VmState) -> Self {
        self.final_state = Some(state);
        self
    }

    pub fn with_proof(mut self, proof: ProofRecord) -> Self {
        self.proof = Some(proof);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn generated(&self) -> Vec<u64> {
        self.generated.lock().unwrap().clone()
    }
}

impl ProofGenerator for StubGenerator {
    fn generate_proof(&self, _ctx: &Context, dir: &Path, step: u64) -> Result<(), GeneratorError> {
        self.generated.lock().unwrap().push(step);
        if self.fail {
            return Err(anyhow::anyhow!("vm crashed").into());
        }

        let store = ProofStore::new(dir);
        if let Some(state) = self.final_state.as_ref().filter(|s| s.step <= step) {
            store.write_terminal(state)?;
            return Ok(());
        }
        if let Some(proof) = &self.proof {
            store.write_proof(step, proof)?;
        }
        Ok(())
    }
}

/// Generator that runs until its context is done.
#[derive(Debug, Default)]
pub struct BlockingGenerator;

impl ProofGenerator for BlockingGenerator {
    fn generate_proof(&self, ctx: &Context, _dir: &Path, _step: u64) -> Result<(), GeneratorError> {
        while !ctx.is_done() {
            thread::sleep(Duration::from_millis(5));
        }
        Err(ctx.check().unwrap_err().into())
    }
}
