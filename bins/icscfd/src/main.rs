// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

mod config;
mod scenario;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use anyhow::{anyhow, Result};
use clap::Parser;
use sip_core::SipUri;
use sip_icscf::ScscfPool;
use tokio::{
    fs,
    sync::watch,
    time::{self, Duration},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{DaemonConfig, RawOptions};
use crate::scenario::{run_scenario, Scenario};

/// I-CSCF routing daemon: S-CSCF pool management and scripted routing runs
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Home domain this I-CSCF is addressed by
    #[arg(long, default_value = "homedomain")]
    home_domain: String,
    /// Listening port, used with the home domain for loop detection
    #[arg(long, default_value_t = 5052)]
    port: u16,
    /// Additional host names that reach this node
    #[arg(long = "alias")]
    aliases: Vec<String>,
    /// S-CSCF pool file (JSON, `s-cscfs` array)
    #[arg(long)]
    scscf_config: Option<PathBuf>,
    /// S-CSCF used when the pool file is missing or unusable
    #[arg(long)]
    default_scscf: Option<String>,
    /// Maximum S-CSCFs tried per request
    #[arg(long, default_value_t = 3)]
    max_attempts: usize,
    /// Seconds between pool file checks (0 disables reloading)
    #[arg(long, default_value_t = 3)]
    reload_interval_secs: u64,
    /// Scenario file to run through the routing engine
    #[arg(long)]
    scenario: Option<PathBuf>,
    /// Validate configuration, print the pool and exit
    #[arg(long)]
    check_config: bool,
    /// Keep running and log pool reloads until interrupted
    #[arg(long)]
    follow: bool,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Entry point for the I-CSCF daemon.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .map_err(|err| anyhow!("invalid --log-level {}: {}", args.log_level, err))?;
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let Args {
        home_domain,
        port,
        aliases,
        scscf_config,
        default_scscf,
        max_attempts,
        reload_interval_secs,
        scenario,
        check_config,
        follow,
        log_level: _,
    } = args;

    let config = DaemonConfig::from_options(RawOptions {
        home_domain,
        port,
        aliases,
        scscf_config,
        default_scscf,
        max_attempts,
        reload_interval_secs,
    })?;
    info!(
        domain = %config.icscf.identity.domain,
        port = config.icscf.identity.port,
        max_attempts = config.icscf.max_attempts,
        "icscfd starting"
    );

    let (pool_tx, pool_rx) = watch::channel(Arc::new(config.pool.load()));
    let reload = (config.pool.path.clone(), config.pool.reload_interval);
    if let (Some(path), Some(interval)) = reload {
        spawn_pool_watcher(path, config.pool.default_scscf.clone(), interval, pool_tx);
    }

    if let Some(path) = scenario {
        let scenario = Scenario::from_file(&path)?;
        let report = run_scenario(&scenario, config.icscf.clone(), pool_rx).await?;
        info!(
            forks = report.forks.len(),
            final_status = report.final_status,
            "scenario finished"
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !check_config && !follow {
        return Err(anyhow!(
            "nothing to do: pass --scenario, --check-config or --follow"
        ));
    }

    print_pool(&pool_rx.borrow());
    if follow {
        follow_pool(pool_rx).await;
    }
    Ok(())
}

fn print_pool(pool: &ScscfPool) {
    if pool.is_empty() {
        warn!("S-CSCF pool is empty; capability-based routing will fail");
    }
    for candidate in pool.candidates() {
        let capabilities: Vec<String> = candidate
            .capabilities
            .iter()
            .map(|c| c.to_string())
            .collect();
        println!(
            "{}\tpriority={}\tcapabilities=[{}]",
            candidate.uri,
            candidate.priority,
            capabilities.join(",")
        );
    }
}

/// Logs every pool change until Ctrl-C.
async fn follow_pool(mut pool_rx: watch::Receiver<Arc<ScscfPool>>) {
    loop {
        tokio::select! {
            changed = pool_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let pool = pool_rx.borrow_and_update().clone();
                info!(servers = pool.len(), "S-CSCF pool reloaded");
                print_pool(&pool);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
}

/// Re-reads the pool file when its modification time changes and publishes
/// the new pool. Parse failures publish the default-only pool.
fn spawn_pool_watcher(
    path: PathBuf,
    default_scscf: Option<SipUri>,
    interval: Duration,
    tx: watch::Sender<Arc<ScscfPool>>,
) {
    tokio::spawn(async move {
        let mut last_modified: Option<SystemTime> = None;
        let mut first = true;
        loop {
            match fs::metadata(&path).await {
                Ok(metadata) => {
                    let modified = metadata.modified().ok();
                    if last_modified != modified {
                        last_modified = modified;
                        // The initial pool was loaded synchronously at startup.
                        if !first {
                            let pool = reload_pool(&path, default_scscf.as_ref()).await;
                            info!(
                                path = %path.display(),
                                servers = pool.len(),
                                "S-CSCF configuration changed"
                            );
                            if tx.send(Arc::new(pool)).is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        %err,
                        path = %path.display(),
                        "unable to read S-CSCF configuration metadata"
                    );
                }
            }
            first = false;
            time::sleep(interval).await;
        }
    });
}

async fn reload_pool(path: &Path, default_scscf: Option<&SipUri>) -> ScscfPool {
    match fs::read_to_string(path).await {
        Ok(contents) => ScscfPool::from_json(&contents).unwrap_or_else(|err| {
            warn!(%err, path = %path.display(), "using default S-CSCF");
            ScscfPool::fallback(default_scscf)
        }),
        Err(err) => {
            warn!(%err, path = %path.display(), "failed to read S-CSCF configuration data");
            ScscfPool::fallback(default_scscf)
        }
    }
}
