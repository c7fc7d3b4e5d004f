//! ptyherd CLI: parse command specifications, build the supervisor, run the
//! event loop until a termination signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ptyherd::{CommandSpec, Config, LogWriter, Subscribe, Supervisor};

/// Keep a herd of commands alive behind private pseudo-terminals and relay
/// their I/O through published links and one shared broadcast terminal.
#[derive(Parser, Debug)]
#[command(name = "ptyherd", version, about)]
struct Args {
    /// Link path published for the broadcast terminal.
    #[arg(short = 'b', long = "broadcast", default_value = "btty", value_name = "LINK")]
    broadcast: PathBuf,

    /// Default inter-byte write delay in seconds (fractions allowed).
    #[arg(short = 'd', long = "delay", value_name = "SECONDS")]
    delay: Option<f64>,

    /// Line-buffer command output toward the broadcast terminal.
    #[arg(long)]
    line_buffer: bool,

    /// Prefix broadcast lines with the command name (implies --line-buffer).
    #[arg(long)]
    prefix: bool,

    /// Do not restart commands when they exit.
    #[arg(long)]
    no_restart: bool,

    /// Do not mirror command output to the broadcast terminal.
    #[arg(long)]
    no_broadcast: bool,

    /// Delete commands when they exit and quit once none remain.
    #[arg(long)]
    exit_on_idle: bool,

    /// String sent to a command (after a leading newline) before it is
    /// signalled during a stop.
    #[arg(long, value_name = "STRING")]
    stop_string: Option<String>,

    /// Increase diagnostic verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command specifications: name,link,log,delay,cmdline
    ///
    /// Empty link defaults to the name; empty log disables logging; empty
    /// delay inherits -d. The command line is everything after the fourth
    /// comma, so it may itself contain commas.
    #[arg(required = true, value_name = "NAME,LINK,LOG,DELAY,CMDLINE")]
    commands: Vec<String>,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ptyherd={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_from(args: &Args) -> anyhow::Result<Config> {
    let mut cfg = Config::default();
    cfg.broadcast_link = args.broadcast.clone();
    if let Some(secs) = args.delay {
        cfg.default_delay =
            Duration::try_from_secs_f64(secs).context("bad -d/--delay value")?;
    }
    cfg.line_buffered = args.line_buffer || args.prefix;
    cfg.prefix_broadcast = args.prefix;
    cfg.broadcast_enabled = !args.no_broadcast;
    cfg.restart.enabled = !args.no_restart;
    cfg.exit_on_idle = args.exit_on_idle;
    cfg.stop.stop_string = args.stop_string.clone();
    Ok(cfg)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = config_from(&args)?;
    let subscribers: Vec<Arc<dyn Subscribe>> = if args.verbose > 0 {
        vec![Arc::new(LogWriter)]
    } else {
        Vec::new()
    };

    let mut supervisor = Supervisor::new(cfg, subscribers)
        .context("failed to set up the supervisor")?;

    for spec_text in &args.commands {
        let spec = CommandSpec::parse(spec_text)
            .with_context(|| format!("bad command specification {spec_text:?}"))?;
        supervisor
            .add(spec)
            .with_context(|| format!("failed to add command {spec_text:?}"))?;
    }

    supervisor.run().context("supervisor failed")?;
    Ok(())
}
