//! Run one shell command on an adb-reachable device and exit with its code.
//!
//! Run with: cargo run -p relay-cli -- --timeout 600 -- cargo test
//!
//! The command's combined output streams to stdout as it accumulates on
//! the device; the process exits with the remote exit code, or 125 on a
//! protocol-level abort.

use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use futures::StreamExt;
use tokio::sync::oneshot;
use probe_relay_adb::AdbChannel;
use probe_relay_core::{RunConfig, TokioClock};
use probe_relay_runner::Runner;
use probe_relay_session::{MemoryStore, RegistryError, RunRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Exit code for protocol-level aborts, distinct from any remote exit code
/// the wrapped command could plausibly produce on purpose.
const PROTOCOL_FAILURE: u8 = 125;

#[derive(Parser)]
#[command(about = "Run a command on a device reachable only through adb keystroke injection")]
struct Args {
    /// Device serial (adb -s).
    #[arg(long)]
    serial: Option<String>,

    /// Remote probe path; must end in `.probe`. Defaults to a unique path
    /// under /data/local/tmp.
    #[arg(long)]
    probe: Option<String>,

    /// Total seconds to wait for completion.
    #[arg(long, default_value_t = 3600)]
    timeout: u64,

    /// Channel recovery attempts before giving up.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Seconds between polls.
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Keep the local transcript copy after completion.
    #[arg(long)]
    keep_log: bool,

    /// Echo each remote command into the log (set -x).
    #[arg(long)]
    debug: bool,

    /// Delete stale remote/local artifacts for the probe before running.
    #[arg(long)]
    scrub: bool,

    /// Command to run on the device.
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let command = args.command.join(" ");
    let probe = args
        .probe
        .unwrap_or_else(|| format!("/data/local/tmp/relay-{}.probe", Uuid::new_v4()));

    let config = RunConfig::new()
        .with_keep_log(args.keep_log)
        .with_debug(args.debug)
        .with_timeout(args.timeout)
        .with_retries(args.retries)
        .with_sleep_interval(args.interval);

    let mut channel = AdbChannel::new();
    if let Some(serial) = args.serial {
        channel = channel.with_serial(serial);
    }

    let runner = Runner::new(Arc::new(channel), TokioClock);
    let registry = Arc::new(RunRegistry::new(runner, MemoryStore::new()));

    if args.scrub {
        if let Err(err) = registry.scrub(&probe, None).await {
            tracing::error!("scrub failed: {err}");
            return ExitCode::from(PROTOCOL_FAILURE);
        }
    }

    // Print transcript lines as the runner observes them. The run may fail
    // before the printer attaches, so it also listens for the done signal.
    let (done_tx, mut done_rx) = tokio::sync::oneshot::channel::<()>();
    let printer = {
        let registry = Arc::clone(&registry);
        let probe = probe.clone();
        tokio::spawn(async move {
            let transcript = loop {
                if let Some(transcript) = registry.transcript(&probe).await {
                    break Some(transcript);
                }
                if !matches!(
                    done_rx.try_recv(),
                    Err(oneshot::error::TryRecvError::Empty)
                ) {
                    break None;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            };
            if let Some(transcript) = transcript {
                // The stream ends once the run pushes its final message.
                let mut lines = transcript.line_stream();
                while let Some(Ok(line)) = lines.next().await {
                    println!("{line}");
                }
            }
        })
    };

    let result = registry.start_run(&command, &probe, &config).await;
    let _ = done_tx.send(());
    let _ = printer.await;

    match result {
        Ok(completed) => match u8::try_from(completed.code) {
            Ok(code) => ExitCode::from(code),
            Err(_) => ExitCode::from(1),
        },
        Err(RegistryError::AlreadyRunning(probe)) => {
            tracing::error!("probe {probe} already has a run in flight");
            ExitCode::from(PROTOCOL_FAILURE)
        }
        Err(err) => {
            tracing::error!("run did not complete: {err}");
            ExitCode::from(PROTOCOL_FAILURE)
        }
    }
}
