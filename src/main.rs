//! chainsettle service entry point.
//!
//! Loads configuration, connects the Postgres ledger, builds the adapter
//! registry, and runs the two settlement passes on independent timers
//! until interrupted:
//!
//! ```text
//! ┌────────┐    ┌─────────────────┐    ┌───────────────────┐
//! │ Config │───▶│ AdapterRegistry │───▶│ DepositScanner    │──┐
//! │ (YAML) │    │ (per symbol)    │    │ WithdrawalTracker │──┴─▶ Postgres
//! └────────┘    └─────────────────┘    └───────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use chainsettle::chain::AdapterRegistry;
use chainsettle::config::AppConfig;
use chainsettle::ledger::pg::PgLedger;
use chainsettle::logging::init_logging;
use chainsettle::settlement::{DepositScanner, WithdrawalTracker};

fn config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "config/chainsettle.yaml".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config_path();
    let config = AppConfig::from_file(&path).with_context(|| format!("loading {path}"))?;
    let _log_guard = init_logging(&config.log);

    info!(config = %path, chains = config.chains.len(), "chainsettle starting");

    let store = Arc::new(
        PgLedger::connect(&config.database.url)
            .await
            .context("connecting to ledger database")?,
    );
    let adapters = Arc::new(
        AdapterRegistry::from_config(&config.chains).context("building chain adapters")?,
    );

    let settlement = &config.settlement;

    let scanner = DepositScanner::new(store.clone(), adapters.clone(), settlement.concurrency);
    let deposit_interval = Duration::from_secs(settlement.deposit_interval_secs);
    let deposit_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(deposit_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = scanner.run_pass().await {
                error!(error = %e, "deposit pass failed");
            }
        }
    });

    let tracker = WithdrawalTracker::new(
        store,
        adapters,
        settlement.concurrency,
        settlement.unresolved_grace_secs,
    );
    let withdrawal_interval = Duration::from_secs(settlement.withdrawal_interval_secs);
    let withdrawal_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(withdrawal_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = tracker.run_pass().await {
                error!(error = %e, "withdrawal pass failed");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    deposit_loop.abort();
    withdrawal_loop.abort();
    Ok(())
}
