mod backoff;
mod config;
mod devices;
mod process;
mod supervisor;

use clap::error::ErrorKind;
use clap::Parser;
use config::InitConfig;
use process::{Kernel, Target};
use std::path::PathBuf;

/// First user-space process: bootstrap /dev, then keep a single program
/// (the shell) running for the lifetime of the machine.
#[derive(Parser, Debug, Default)]
#[command(name = "warden", version, about)]
pub struct Cli {
    /// Config file path (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print resolved settings and exit without touching the system
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (device bootstrap, orphan reaping)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "warden=debug"
        } else if self.quiet {
            "warden=warn"
        } else {
            "warden=info"
        }
    }
}

fn main() {
    // The kernel may hand init arguments meant for someone else; never die
    // over them.
    let (cli, parse_error) = match Cli::try_parse() {
        Ok(cli) => (cli, None),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => (Cli::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.default_filter())),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    if let Some(e) = parse_error {
        tracing::warn!(error = %e, "ignoring unrecognized arguments");
    }

    tracing::info!("init starting");
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = InitConfig::load(cli.config.as_deref());

    if cli.dry_run {
        println!("warden v{}", env!("CARGO_PKG_VERSION"));
        println!("{config:#?}");
        return;
    }

    announce_process_identity();

    if let Err(e) = devices::bootstrap(&config.devices) {
        tracing::error!(error = %e, "device bootstrap failed");
        std::process::exit(1);
    }

    let target = Target::new(&config.target.program).or_else(|e| {
        tracing::error!(error = %e, "falling back to default target");
        Target::new(&config::TargetConfig::default().program)
    });
    let target = match target {
        Ok(target) => target,
        Err(e) => {
            tracing::error!(error = %e, "no usable target program");
            std::process::exit(1);
        }
    };

    let backoff = backoff::SpawnBackoff::new(&config.spawn_backoff);
    supervisor::Supervisor::new(Kernel, target, backoff).run()
}

/// Orphans are re-parented to PID 1. Anywhere else we need to ask the kernel
/// to send them to us.
fn announce_process_identity() {
    let pid = std::process::id();
    if pid == 1 {
        return;
    }
    tracing::warn!(pid, "not running as PID 1");
    #[cfg(target_os = "linux")]
    if let Err(e) = nix::sys::prctl::set_child_subreaper(true) {
        tracing::warn!(error = %e, "failed to become child subreaper");
    }
}
