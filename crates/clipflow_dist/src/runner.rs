//! Approval-driven polling dispatcher.
//!
//! Watches `sandbox/inbox/` for `approve-*.json` artifacts and drives one
//! bundle export per `(job_id, platform, nonce)`. Idempotency is persisted
//! in `<platform>.state.json`: a settled state with a matching nonce makes
//! a re-dropped approval a silent no-op, while a fresh nonce re-runs the
//! bundler and pulls the state forward. Per-approval failures are recorded
//! and never halt the loop; only store-level failures are fatal.

use crate::bundle::generate_bundle;
use anyhow::{Context, Result};
use clipflow_protocol::events::now_utc_ts;
use clipflow_protocol::naming::is_safe_job_id;
use clipflow_protocol::paths::SandboxLayout;
use clipflow_protocol::publish::{Approval, PlatformState, PlatformStatus, KNOWN_PLATFORMS};
use clipflow_store::{read_json_as, read_json_if_exists, write_json_atomic};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub layout: SandboxLayout,
    pub poll_interval: Duration,
}

impl RunnerConfig {
    pub fn new(layout: SandboxLayout) -> Self {
        Self { layout, poll_interval: Duration::from_secs(2) }
    }
}

/// Main polling loop. Returns cleanly on SIGINT; any propagated error is
/// fatal to the runner.
pub async fn run_loop(cfg: &RunnerConfig) -> Result<()> {
    let inbox = cfg.layout.inbox_dir();
    fs::create_dir_all(&inbox)
        .with_context(|| format!("Failed to create inbox directory {}", inbox.display()))?;

    info!("Clipflow distribution runner started");
    info!(inbox = %inbox.display(), "watching for approve-*.json");
    info!(poll_interval_sec = cfg.poll_interval.as_secs(), "poll interval");

    let mut ticker = tokio::time::interval(cfg.poll_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("runner stopped by user");
                return Ok(());
            }
            _ = ticker.tick() => {
                scan_inbox(cfg)?;
            }
        }
    }
}

/// One poll: process every approval artifact currently in the inbox, in
/// filename order.
pub fn scan_inbox(cfg: &RunnerConfig) -> Result<()> {
    let inbox = cfg.layout.inbox_dir();
    let mut approvals: Vec<PathBuf> = fs::read_dir(&inbox)
        .with_context(|| format!("Failed to read inbox {}", inbox.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("approve-") && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    approvals.sort();

    for approval_path in approvals {
        process_approval(cfg, &approval_path)?;
    }
    Ok(())
}

/// Handle a single approval artifact to completion. Malformed artifacts,
/// unknown platforms, missing plans and bundler failures are logged (and,
/// where the idempotency key is known, recorded as FAILED); they do not
/// propagate.
pub fn process_approval(cfg: &RunnerConfig, approval_path: &Path) -> Result<()> {
    let Some(raw) = read_json_if_exists(approval_path) else {
        error!(approval = %approval_path.display(), "failed to load approval artifact");
        return Ok(());
    };
    let Some(approval) = Approval::from_value(&raw) else {
        warn!(approval = %approval_path.display(), "invalid approval artifact format");
        return Ok(());
    };
    if !approval.approved {
        info!(job_id = %approval.job_id, platform = %approval.platform, "skipping rejection");
        return Ok(());
    }
    if !is_safe_job_id(&approval.job_id) {
        warn!(job_id = %approval.job_id, "approval carries an unsafe job_id; skipping");
        return Ok(());
    }

    // Idempotency: a settled state for this exact nonce is a no-op.
    let state_path = cfg.layout.platform_state_path(&approval.job_id, &approval.platform);
    if let Some(state) = read_json_as::<PlatformState>(&state_path) {
        if state.nonce == approval.nonce && state.status.is_settled() {
            return Ok(());
        }
    }

    info!(
        job_id = %approval.job_id,
        platform = %approval.platform,
        nonce = %approval.nonce,
        "processing approval"
    );

    let plan_path = cfg.layout.publish_plan_path(&approval.job_id);
    if !plan_path.exists() {
        error!(job_id = %approval.job_id, plan = %plan_path.display(), "missing publish_plan.json");
        write_platform_state(cfg, &approval, PlatformStatus::Failed, Some("Missing publish_plan.json"))?;
        return Ok(());
    }

    if !KNOWN_PLATFORMS.contains(&approval.platform.as_str()) {
        error!(platform = %approval.platform, "no adapter for platform");
        write_platform_state(
            cfg,
            &approval,
            PlatformStatus::Failed,
            Some(&format!("Unsupported platform: {}", approval.platform)),
        )?;
        return Ok(());
    }

    match generate_bundle(
        &cfg.layout,
        &approval.job_id,
        &approval.platform,
        &plan_path,
        &cfg.layout.dist_root(),
    ) {
        Ok(Some(bundle_path)) => {
            info!(bundle = %bundle_path.display(), "bundle generated");
            write_platform_state(cfg, &approval, PlatformStatus::BundleGenerated, None)?;
        }
        Ok(None) => {
            warn!(
                job_id = %approval.job_id,
                platform = %approval.platform,
                "no plan content for platform"
            );
            write_platform_state(cfg, &approval, PlatformStatus::Skipped, Some("Platform not in plan"))?;
        }
        Err(e) => {
            error!(
                job_id = %approval.job_id,
                platform = %approval.platform,
                error = %e,
                "bundle generation failed"
            );
            write_platform_state(cfg, &approval, PlatformStatus::Failed, Some(&e.to_string()))?;
        }
    }
    Ok(())
}

fn write_platform_state(
    cfg: &RunnerConfig,
    approval: &Approval,
    status: PlatformStatus,
    error: Option<&str>,
) -> Result<()> {
    let state = PlatformState {
        job_id: approval.job_id.clone(),
        platform: approval.platform.clone(),
        nonce: approval.nonce.clone(),
        status,
        updated_at: now_utc_ts(),
        error: error.map(str::to_string),
    };
    let path = cfg.layout.platform_state_path(&approval.job_id, &approval.platform);
    write_json_atomic(&path, &state)
        .with_context(|| format!("Failed to write platform state {}", path.display()))
}
