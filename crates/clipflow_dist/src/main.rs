//! Clipflow distribution runner binary.
//!
//! Polls `sandbox/inbox/` for approval artifacts and materializes platform
//! bundles. SIGINT exits cleanly; any other fatal error exits 1.

use clap::Parser;
use clipflow_dist::{run_loop, RunnerConfig};
use clipflow_logging::LogConfig;
use clipflow_protocol::paths::{project_root, SandboxLayout};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "clipflow-dist", about = "Approval-driven distribution runner for Clipflow")]
struct Args {
    /// Seconds between inbox polls
    #[arg(long, default_value_t = 2)]
    poll_interval: u64,

    /// Mirror debug logging to the console
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = clipflow_logging::init_logging(LogConfig {
        app_name: "clipflow-dist",
        verbose: args.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {e:#}");
    }

    let sandbox =
        std::env::var("CLIPFLOW_SANDBOX_PATH").unwrap_or_else(|_| "sandbox".to_string());
    let layout = SandboxLayout::with_sandbox(project_root(), sandbox);
    let config = RunnerConfig {
        layout,
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
    };

    if let Err(e) = run_loop(&config).await {
        tracing::error!("fatal runner error: {e:#}");
        std::process::exit(1);
    }
}
