//! vigild — metagraph cluster health monitor and recovery daemon.
//!
//! Polls each node's layer processes, classifies forks, snapshot stalls
//! and unreachable nodes, and drives remote restart procedures over SSH
//! to bring the cluster back to a healthy state.
//!
//! # Usage
//!
//! ```text
//! vigild --once     # single health check (the default)
//! vigild --daemon   # continuous monitoring
//! ```
//!
//! Configuration comes from `VIGIL_*` environment variables; see
//! `config.rs` for the full list.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use vigild::config::MonitorConfig;
use vigild::monitor::MonitorLoop;
use vigil_detect::{ConditionEngine, HypergraphDetector};
use vigil_notify::{Notifier, NullNotifier, WebhookNotifier};
use vigil_probe::HttpNodeApi;
use vigil_restart::{Orchestrator, RestartPolicy, SshExecutor};

#[derive(Parser)]
#[command(
    name = "vigild",
    about = "Metagraph cluster health monitor and recovery controller"
)]
struct Cli {
    /// Run continuously, checking on the configured interval.
    #[arg(long, conflicts_with = "once")]
    daemon: bool,

    /// Run a single health check and exit (the default).
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vigild=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal: invalid configuration");
            return ExitCode::from(1);
        }
    };

    info!(
        nodes = config.nodes.len(),
        dry_run = config.dry_run,
        "vigild starting"
    );

    let api = Arc::new(HttpNodeApi::new());
    let mut engine = ConditionEngine::new(
        api,
        config.nodes.clone(),
        config.snapshot_stall.as_secs(),
    );
    if config.hypergraph.enabled {
        engine = engine.with_hypergraph(HypergraphDetector::new(config.hypergraph.clone()));
    }

    let executor = SshExecutor::new(config.ssh_user.clone(), &config.ssh_key_path)
        .with_templates(config.templates.clone())
        .with_connect_timeout(config.ssh_connect_timeout)
        .dry_run(config.dry_run);
    let orchestrator =
        Orchestrator::new(Arc::new(executor), config.nodes.clone()).with_policy(RestartPolicy {
            cooldown_secs: config.restart_cooldown.as_secs(),
            max_per_hour: config.max_restarts_per_hour,
        });

    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NullNotifier),
    };

    let mut monitor = MonitorLoop::new(engine, orchestrator, notifier, config.check_interval);

    if cli.daemon {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
        monitor.run(shutdown_rx).await;
        info!("vigild stopped");
    } else {
        let summary = monitor.run_once().await;
        info!(condition = %summary.condition, "one-shot check complete");
    }

    ExitCode::SUCCESS
}
