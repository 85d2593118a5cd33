//! `fpvm-trace`: query a trace directory for the data a dispute game needs.
//!
//! Missing proofs are generated by running the VM binary, and cached in the
//! trace directory for later queries.

mod logger;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use fpvm_provider::{
    generator::{DEFAULT_INFO_FREQ, DEFAULT_SNAPSHOT_FREQ},
    Context, ExecutorConfig, ProviderConfig, TraceProvider, VmExecutor, DEFAULT_PRE_STATE,
};
use logger::init_logger;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "fpvm-trace", version, about)]
struct Cli {
    /// Trace directory holding the proof cache.
    #[arg(long)]
    dir: PathBuf,

    /// Absolute pre-state file, relative to the trace directory unless
    /// absolute.
    #[arg(long, default_value = DEFAULT_PRE_STATE)]
    prestate: PathBuf,

    /// VM binary used to generate missing proofs.
    #[arg(long, default_value = "cannon")]
    vm_bin: PathBuf,

    /// Program server run by the VM.
    #[arg(long, default_value = "op-program")]
    server_bin: PathBuf,

    /// Frequency, in steps, of the snapshots written while generating.
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_FREQ)]
    snapshot_freq: u64,

    /// Frequency, in steps, of the VM progress logs.
    #[arg(long, default_value_t = DEFAULT_INFO_FREQ)]
    info_freq: u64,

    /// Abort the query after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Default log level, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Argument passed to the program server, repeatable.
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the commitment to the post-state of a step.
    Get { index: u64 },
    /// Print the preimage oracle interaction of a step.
    Oracle { index: u64 },
    /// Print the state and proof data of a step.
    Preimage { index: u64 },
    /// Print the commitment to the absolute pre-state.
    Prestate,
}

impl Cli {
    fn context(&self) -> Context {
        match self.timeout_secs {
            Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
            None => Context::new(),
        }
    }

    fn provider(&self) -> TraceProvider<VmExecutor> {
        let executor = VmExecutor::new(ExecutorConfig {
            vm_bin: self.vm_bin.clone(),
            server_bin: self.server_bin.clone(),
            server_args: self.server_args.clone(),
            pre_state: self.dir.join(&self.prestate),
            snapshot_freq: self.snapshot_freq,
            info_freq: self.info_freq,
        });
        let config = ProviderConfig::new(&self.dir).with_pre_state(&self.prestate);
        TraceProvider::new(config, executor)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logger(&cli.log_level)?;

    let ctx = cli.context();
    let provider = cli.provider();
    info!(dir = %cli.dir.display(), command = ?cli.command, "querying trace");

    match cli.command {
        Command::Get { index } => {
            let value = provider
                .get(&ctx, index)
                .with_context(|| format!("failed to get commitment at step {index}"))?;
            println!("{value}");
        }
        Command::Oracle { index } => {
            let data = provider
                .get_oracle_data(&ctx, index)
                .with_context(|| format!("failed to get oracle data at step {index}"))?;
            if data.is_empty() {
                println!("no oracle read at step {index}");
            } else {
                println!("local:  {}", data.is_local);
                println!("key:    {}", data.oracle_key);
                println!("data:   {}", data.oracle_data);
                println!("offset: {}", data.oracle_offset);
            }
        }
        Command::Preimage { index } => {
            let (state_data, proof_data) = provider
                .get_preimage(&ctx, index)
                .with_context(|| format!("failed to get preimage at step {index}"))?;
            println!("state: {state_data}");
            println!("proof: {proof_data}");
        }
        Command::Prestate => {
            let value = provider
                .absolute_pre_state(&ctx)
                .context("failed to load absolute pre-state")?;
            println!("{value}");
        }
    }

    Ok(())
}
