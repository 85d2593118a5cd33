use std::{
    ffi::OsString,
    fs,
    io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use fpvm_state::VmState;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{GeneratorError, ProofGenerator};
use crate::{Cancelled, Context, ProofStore, StoreError, FINAL_STATE, PROOFS_DIR, SNAPSHOTS_DIR};

pub const DEFAULT_SNAPSHOT_FREQ: u64 = 1_000_000_000;
pub const DEFAULT_INFO_FREQ: u64 = 10_000_000;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration of the external VM run by [`VmExecutor`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutorConfig {
    /// VM binary executing the program.
    pub vm_bin: PathBuf,
    /// Program server the VM runs.
    pub server_bin: PathBuf,
    #[serde(default)]
    pub server_args: Vec<String>,
    /// State executions start from when no snapshot applies.
    pub pre_state: PathBuf,
    #[serde(default = "default_snapshot_freq")]
    pub snapshot_freq: u64,
    #[serde(default = "default_info_freq")]
    pub info_freq: u64,
}

const fn default_snapshot_freq() -> u64 {
    DEFAULT_SNAPSHOT_FREQ
}

const fn default_info_freq() -> u64 {
    DEFAULT_INFO_FREQ
}

impl ExecutorConfig {
    pub fn new(vm_bin: impl Into<PathBuf>, server_bin: impl Into<PathBuf>, pre_state: impl Into<PathBuf>) -> Self {
        Self {
            vm_bin: vm_bin.into(),
            server_bin: server_bin.into(),
            server_args: Vec::new(),
            pre_state: pre_state.into(),
            snapshot_freq: DEFAULT_SNAPSHOT_FREQ,
            info_freq: DEFAULT_INFO_FREQ,
        }
    }
}

/// Generates proofs by running the external VM up to the requested step.
///
/// Each run writes into a scratch directory inside the trace directory; the
/// outputs are then published into the trace directory with write-once
/// renames. Snapshots are written straight into `snapshots/` so that later
/// runs can resume from them.
#[derive(Clone, Debug)]
pub struct VmExecutor {
    config: ExecutorConfig,
}

impl VmExecutor {
    pub const fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Command line of a run producing the proof of `step`.
    fn args(&self, start: &Path, scratch: &Path, snapshot_dir: &Path, step: u64) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "run".into(),
            "--input".into(),
            start.into(),
            "--output".into(),
            scratch.join(FINAL_STATE).into(),
            "--meta".into(),
            "".into(),
            "--proof-at".into(),
            format!("={step}").into(),
            "--proof-fmt".into(),
            scratch.join(PROOFS_DIR).join("%d.json").into(),
            "--snapshot-at".into(),
            format!("%{}", self.config.snapshot_freq).into(),
            "--snapshot-fmt".into(),
            snapshot_dir.join("%d.json").into(),
            "--info-at".into(),
            format!("%{}", self.config.info_freq).into(),
        ];
        // No step follows u64::MAX, so the run is bounded by the proof alone.
        if let Some(stop) = step.checked_add(1) {
            args.extend([OsString::from("--stop-at"), OsString::from(format!("={stop}"))]);
        }
        args.extend([OsString::from("--"), self.config.server_bin.clone().into_os_string()]);
        args.extend(self.config.server_args.iter().map(OsString::from));
        args
    }

    /// Waits for `child`, killing it if `ctx` is done first.
    fn wait(&self, ctx: &Context, mut child: Child) -> Result<(), GeneratorError> {
        let bin = &self.config.vm_bin;
        let spawn_err = |source: io::Error| GeneratorError::Spawn {
            bin: bin.clone(),
            source,
        };

        loop {
            let status = match child.try_wait() {
                Ok(status) => status,
                Err(err) => {
                    warn!(pid = child.id(), %err, "lost track of vm run, killing it");
                    reap(&mut child);
                    return Err(spawn_err(err));
                }
            };
            if let Some(status) = status {
                if !status.success() {
                    return Err(GeneratorError::Failed(status));
                }
                return Ok(());
            }
            if ctx.is_done() {
                warn!(pid = child.id(), "cancelling vm run");
                reap(&mut child);
                return Err(Cancelled.into());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Moves the outputs of a run from `scratch` into the trace directory.
    fn publish(&self, store: &ProofStore, scratch: &Path, step: u64) -> Result<(), GeneratorError> {
        let proof = scratch.join(PROOFS_DIR).join(format!("{step}.json"));
        if let Some(bytes) = read_optional(&proof)? {
            store.publish_proof_bytes(step, &bytes)?;
        }

        let final_path = scratch.join(FINAL_STATE);
        if let Some(bytes) = read_optional(&final_path)? {
            let state = VmState::decode(&bytes).map_err(|source| StoreError::State {
                path: final_path.clone(),
                source,
            })?;
            // Only a halted machine marks the end of the trace; otherwise the
            // output is just the state the run stopped at.
            if state.exited && state.step <= step {
                info!(step = state.step, "trace ends before requested step");
                store.publish_terminal_bytes(&bytes)?;
            }
        }
        Ok(())
    }
}

impl ProofGenerator for VmExecutor {
    #[instrument(level = "info", skip(self, ctx, dir), fields(dir = %dir.display()))]
    fn generate_proof(&self, ctx: &Context, dir: &Path, step: u64) -> Result<(), GeneratorError> {
        ctx.check()?;

        let store = ProofStore::new(dir);
        let snapshot_dir = dir.join(SNAPSHOTS_DIR);
        fs::create_dir_all(&snapshot_dir).map_err(|err| io_err(&snapshot_dir, err))?;

        let start = find_starting_snapshot(&snapshot_dir, &self.config.pre_state, step)?;
        let scratch = tempfile::Builder::new()
            .prefix(".generate-")
            .tempdir_in(dir)
            .map_err(|err| io_err(dir, err))?;
        let scratch_proofs = scratch.path().join(PROOFS_DIR);
        fs::create_dir_all(&scratch_proofs).map_err(|err| io_err(&scratch_proofs, err))?;

        let args = self.args(&start, scratch.path(), &snapshot_dir, step);
        info!(start = %start.display(), "running vm");
        debug!(?args, "vm command line");

        // Keep stdout for the caller's own output.
        let child = Command::new(&self.config.vm_bin)
            .args(&args)
            .stdout(Stdio::from(io::stderr()))
            .spawn()
            .map_err(|source| GeneratorError::Spawn {
                bin: self.config.vm_bin.clone(),
                source,
            })?;
        self.wait(ctx, child)?;

        self.publish(&store, scratch.path(), step)
    }
}

/// Kills `child` and waits for it to exit.
fn reap(child: &mut Child) {
    // The child may have exited since the last poll.
    let _ = child.kill();
    let _ = child.wait();
}

/// Returns the newest snapshot strictly before `step`, or `pre_state` if
/// there is none.
///
/// Snapshots are named `<step>.json` or `<step>.json.gz`; other entries are
/// ignored.
pub(crate) fn find_starting_snapshot(
    snapshot_dir: &Path,
    pre_state: &Path,
    step: u64,
) -> Result<PathBuf, GeneratorError> {
    let entries = match fs::read_dir(snapshot_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(pre_state.to_path_buf()),
        Err(err) => return Err(io_err(snapshot_dir, err)),
    };

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|err| io_err(snapshot_dir, err))?;
        let name = entry.file_name();
        let Some(snapshot_step) = name.to_str().and_then(parse_snapshot_step) else {
            continue;
        };
        if snapshot_step < step && best.as_ref().is_none_or(|(best, _)| snapshot_step > *best) {
            best = Some((snapshot_step, entry.path()));
        }
    }

    Ok(best.map_or_else(|| pre_state.to_path_buf(), |(_, path)| path))
}

fn parse_snapshot_step(name: &str) -> Option<u64> {
    let stem = name
        .strip_suffix(".json.gz")
        .or_else(|| name.strip_suffix(".json"))?;
    stem.parse().ok()
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, GeneratorError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

fn io_err(path: &Path, source: io::Error) -> GeneratorError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"{}").unwrap();
    }

    #[test]
    fn test_starting_snapshot_without_snapshots() {
        let dir = TempDir::new().unwrap();
        let pre_state = Path::new("/trace/state.json");

        let start = find_starting_snapshot(&dir.path().join("missing"), pre_state, 100).unwrap();
        assert_eq!(start, pre_state);

        let start = find_starting_snapshot(dir.path(), pre_state, 100).unwrap();
        assert_eq!(start, pre_state);
    }

    #[test]
    fn test_starting_snapshot_picks_newest_before_step() {
        let dir = TempDir::new().unwrap();
        for name in ["10.json", "20.json", "30.json.gz", "40.json.tmp", "notes.txt", "x.json"] {
            touch(dir.path(), name);
        }
        let pre_state = Path::new("state.json");

        let start = |step| find_starting_snapshot(dir.path(), pre_state, step).unwrap();
        assert_eq!(start(25), dir.path().join("20.json"));
        assert_eq!(start(20), dir.path().join("10.json"));
        assert_eq!(start(31), dir.path().join("30.json.gz"));
        assert_eq!(start(1000), dir.path().join("30.json.gz"));
        assert_eq!(start(10), pre_state);
    }

    #[test]
    fn test_command_line() {
        let mut config = ExecutorConfig::new("/bin/vm", "/bin/server", "/trace/state.json");
        config.server_args = vec!["--network".into(), "devnet".into()];
        config.snapshot_freq = 500;
        config.info_freq = 50;
        let executor = VmExecutor::new(config);

        let args = executor.args(
            Path::new("/trace/state.json"),
            Path::new("/trace/.generate-x"),
            Path::new("/trace/snapshots"),
            41,
        );
        let args: Vec<_> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            vec![
                "run",
                "--input",
                "/trace/state.json",
                "--output",
                "/trace/.generate-x/final.json",
                "--meta",
                "",
                "--proof-at",
                "=41",
                "--proof-fmt",
                "/trace/.generate-x/proofs/%d.json",
                "--snapshot-at",
                "%500",
                "--snapshot-fmt",
                "/trace/snapshots/%d.json",
                "--info-at",
                "%50",
                "--stop-at",
                "=42",
                "--",
                "/bin/server",
                "--network",
                "devnet",
            ]
        );
    }

    #[test]
    fn test_command_line_at_last_step() {
        let executor = VmExecutor::new(ExecutorConfig::new("/bin/vm", "/bin/server", "state.json"));
        let args = executor.args(
            Path::new("state.json"),
            Path::new("/trace/.generate-x"),
            Path::new("/trace/snapshots"),
            u64::MAX,
        );
        let args: Vec<_> = args.iter().map(|a| a.to_str().unwrap()).collect();

        let proof_at = args.iter().position(|&a| a == "--proof-at").unwrap();
        assert_eq!(args[proof_at + 1], "=18446744073709551615");
        assert!(!args.contains(&"--stop-at"));
        assert_eq!(&args[args.len() - 2..], ["--", "/bin/server"]);
    }

    #[test]
    fn test_config_defaults() {
        let config: ExecutorConfig = serde_json::from_str(
            r#"{"vm-bin": "cannon", "server-bin": "server", "pre-state": "state.json"}"#,
        )
        .unwrap();
        assert_eq!(config.snapshot_freq, DEFAULT_SNAPSHOT_FREQ);
        assert_eq!(config.info_freq, DEFAULT_INFO_FREQ);
        assert!(config.server_args.is_empty());
    }

    #[cfg(unix)]
    mod process {
        use std::{os::unix::fs::PermissionsExt, time::Instant};

        use alloy_primitives::B256;

        use super::*;

        const FAKE_VM: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --proof-at) at="${2#=}"; shift 2 ;;
    --proof-fmt) fmt="$2"; shift 2 ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
if [ "$at" -ge 3 ]; then
  echo '{"memRoot":"0x0000000000000000000000000000000000000000000000000000000000000000","preimageKey":"0x0000000000000000000000000000000000000000000000000000000000000000","preimageOffset":0,"pc":0,"nextPC":4,"lo":0,"hi":0,"heap":0,"exit":0,"exited":true,"step":3,"registers":[0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0]}' > "$out"
  exit 0
fi
printf '{"post":"0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","step":%s}' "$at" > "$(printf "$fmt" "$at")"
"#;

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        // All scripts are written before anything is spawned, so no child
        // inherits a script still open for writing.
        #[test]
        fn test_vm_runs() {
            let bin = TempDir::new().unwrap();
            let fake = script(bin.path(), "fake-vm", FAKE_VM);
            let failing = script(bin.path(), "failing-vm", "#!/bin/sh\nexit 3\n");
            let hanging = script(bin.path(), "hanging-vm", "#!/bin/sh\nexec sleep 30\n");

            // Proof within the trace.
            let trace = TempDir::new().unwrap();
            let executor = VmExecutor::new(ExecutorConfig::new(&fake, "server", "state.json"));
            executor
                .generate_proof(&Context::new(), trace.path(), 1)
                .unwrap();
            let store = ProofStore::new(trace.path());
            let record = store.read_proof(1).unwrap().expect("proof published");
            assert_eq!(record.claim_value, Some(B256::repeat_byte(0xaa)));
            assert!(store.read_terminal().unwrap().is_none());

            // Step past the end of the trace.
            executor
                .generate_proof(&Context::new(), trace.path(), 7)
                .unwrap();
            assert!(store.read_proof(7).unwrap().is_none());
            let terminal = store.read_terminal().unwrap().expect("terminal published");
            assert_eq!(terminal.step, 3);
            assert!(terminal.exited);

            // Scratch directories are cleaned up.
            let leftovers = fs::read_dir(trace.path())
                .unwrap()
                .filter(|entry| {
                    let name = entry.as_ref().unwrap().file_name();
                    name.to_string_lossy().starts_with(".generate-")
                })
                .count();
            assert_eq!(leftovers, 0);

            // Non-zero exit status.
            let executor = VmExecutor::new(ExecutorConfig::new(&failing, "server", "state.json"));
            let err = executor
                .generate_proof(&Context::new(), trace.path(), 2)
                .unwrap_err();
            assert!(matches!(err, GeneratorError::Failed(status) if status.code() == Some(3)));

            // Deadline kills the run.
            let executor = VmExecutor::new(ExecutorConfig::new(&hanging, "server", "state.json"));
            let started = Instant::now();
            let err = executor
                .generate_proof(&Context::with_timeout(Duration::from_millis(100)), trace.path(), 2)
                .unwrap_err();
            assert!(matches!(err, GeneratorError::Cancelled(_)));
            assert!(started.elapsed() < Duration::from_secs(10));

            // Missing binary.
            let executor = VmExecutor::new(ExecutorConfig::new(
                bin.path().join("does-not-exist"),
                "server",
                "state.json",
            ));
            let err = executor
                .generate_proof(&Context::new(), trace.path(), 2)
                .unwrap_err();
            assert!(matches!(err, GeneratorError::Spawn { .. }));

            // A reaped run is gone.
            let mut child = Command::new(&hanging).spawn().unwrap();
            reap(&mut child);
            assert!(child.try_wait().unwrap().is_some());
        }
    }
}
