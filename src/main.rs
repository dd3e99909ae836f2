use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vtdriver::config::{DEFAULT_KEYCODES, parse_screen_speed, parse_switch};
use vtdriver::host::{self, HostOptions};
use vtdriver::{DriverConfig, LogTarget, Script, parse_keycodes_file, parse_script_file};

#[derive(Parser, Debug)]
#[command(
    name = "vtdriver",
    about = "Replay a command script against an interactive terminal program",
    version
)]
struct Args {
    /// Script file; a name that does not exist is looked up under Scripts/
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Key-code file mapping key names to the bytes they send
    #[arg(short, long, default_value = DEFAULT_KEYCODES)]
    keycodes: PathBuf,

    /// Session id written into every record and file name
    #[arg(long, env = "VTDRIVER_SESSION_ID")]
    session_id: Option<String>,

    /// Host label used for file names and the capture header
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Diagnostic log path (default: Logs/<host>[_<sid>]_<timestamp>.log)
    #[arg(long, conflicts_with = "no_log")]
    log_file: Option<PathBuf>,

    /// Do not write a diagnostic log
    #[arg(long)]
    no_log: bool,

    /// Capture log path (default: Capture/<host>[_<sid>]_outputs_<timestamp>.log)
    #[arg(long, conflicts_with = "no_capture")]
    capture_file: Option<PathBuf>,

    /// Do not write a capture log
    #[arg(long)]
    no_capture: bool,

    /// Write a replayable inputs log (yes/on)
    #[arg(long, default_value = "no")]
    record_inputs: String,

    /// Inputs log path; implies --record-inputs yes
    #[arg(long)]
    inputs_file: Option<PathBuf>,

    /// Send one character at a time, waiting for each to echo
    #[arg(long)]
    key_press_sync: bool,

    /// Write raw program output next to each screen capture
    #[arg(long)]
    capture_raw: bool,

    /// Tick period: `slow`, `fast`, or milliseconds
    #[arg(long, default_value = "fast", value_parser = parse_screen_speed)]
    screen_speed: Duration,

    /// Exit once the script is done; fail if it halted on a mismatch
    #[arg(long)]
    exit_on_complete: bool,

    /// Log level for stderr output (RUST_LOG overrides)
    #[arg(long, default_value = "warn", env = "VTDRIVER_LOG_LEVEL")]
    log_level: String,

    /// Command to run in the PTY
    #[arg(short, long, default_value = "sh")]
    command: String,

    /// Arguments to pass to the command
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn target(path: Option<PathBuf>, disabled: bool) -> LogTarget {
    match (path, disabled) {
        (_, true) => LogTarget::Disabled,
        (Some(path), false) => LogTarget::Path(path),
        (None, false) => LogTarget::Auto,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let script = match &args.script {
        Some(path) => parse_script_file(path)?,
        None => Script::default(),
    };
    let keys = parse_keycodes_file(&args.keycodes)?;

    let inputs = match args.inputs_file {
        Some(path) => LogTarget::Path(path),
        None if parse_switch(&args.record_inputs) => LogTarget::Auto,
        None => LogTarget::Disabled,
    };
    let config = DriverConfig {
        session_id: args.session_id,
        host: args.host,
        script: args.script,
        keycodes: args.keycodes,
        log: target(args.log_file, args.no_log),
        capture: target(args.capture_file, args.no_capture),
        inputs,
        key_press_sync: args.key_press_sync,
        capture_raw: args.capture_raw,
        screen_speed: args.screen_speed,
        ..DriverConfig::default()
    };

    let options = HostOptions {
        command: args.command,
        args: args.args,
        exit_on_complete: args.exit_on_complete,
    };
    let summary = host::run(config, script, keys, options).await?;

    if args.exit_on_complete {
        if let Some(mismatch) = summary.mismatch {
            bail!("script halted: {}", mismatch);
        }
    }
    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
