//! Clipflow job controller binary.
//!
//! Usage:
//!     clipflow-controller --job sandbox/jobs/<job_id>.job.json [--max-retries 2]
//!
//! Exit codes: 0 on COMPLETED or when another controller holds the job
//! lock; 1 on any other terminal state or runtime error.

use clap::Parser;
use clipflow_controller::{run_job, Collaborators, ControllerConfig};
use clipflow_logging::LogConfig;
use clipflow_protocol::paths::SandboxLayout;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "clipflow-controller", about = "Single-job pipeline controller for Clipflow")]
struct Args {
    /// Path to a <job_id>.job.json contract
    #[arg(long)]
    job: PathBuf,

    /// Max retries (default: 2, clamped at 0)
    #[arg(long, default_value_t = 2)]
    max_retries: i64,

    /// Mirror debug logging to the console
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = clipflow_logging::init_logging(LogConfig {
        app_name: "clipflow-controller",
        verbose: args.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {e:#}");
    }

    let config = ControllerConfig {
        layout: SandboxLayout::discover(),
        job_path: args.job,
        max_retries: args.max_retries.max(0) as u32,
        collaborators: Collaborators::from_env(),
    };

    let code = match run_job(&config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("controller failed: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
