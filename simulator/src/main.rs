//! Strongbox Simulator
//!
//! Hammers an in-memory ledger with concurrent traffic and checks that no
//! money is created or lost along the way.

use anyhow::{anyhow, bail};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;
mod workload;

use rust_decimal::Decimal;
use strongbox_common::{Amount, AmountPolicy};
use strongbox_ledger::LedgerConfig;

use controller::{SimulationController, SimulationSettings};
use scenario::Scenario;

/// Parse the seed balance and check it against the configured ceiling.
fn parse_initial_balance(raw: &str, policy: AmountPolicy) -> anyhow::Result<Amount> {
    let value: Decimal = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("initial balance {raw:?} is not a valid number"))?;
    Ok(policy.validate(value)?)
}

/// Strongbox Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Strongbox contention and conservation simulator")]
struct Args {
    /// Number of accounts to create
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Concurrent workers submitting operations
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// Operations per scenario
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Starting balance of every account
    #[arg(long, default_value = "1000.00")]
    initial_balance: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Scenario to run
    #[arg(short, long, default_value = "random-traffic")]
    scenario: String,

    /// Emit JSON logs and a JSON report
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(args.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Strongbox Simulator");

    let config = LedgerConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow!("Configuration error: {}", e));
    }

    if args.accounts < 2 {
        bail!("at least two accounts are required");
    }
    let initial_balance = parse_initial_balance(&args.initial_balance, config.amount_policy())?;
    let scenario = Scenario::load(&args.scenario, args.operations)?;

    let settings = SimulationSettings {
        accounts: args.accounts,
        workers: args.workers,
        initial_balance,
        seed: args.seed,
    };
    let mut controller = SimulationController::new(settings, &config);
    controller.initialize().await?;
    controller.run_scenario(&scenario).await?;

    let report = controller.report(&scenario).await?;
    debug!("Ledger counters\n{}", controller.prometheus());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!("Simulation complete");
        info!("Total operations: {}", report.metrics.total_operations);
        info!("Committed: {}", report.metrics.committed);
        info!("Insufficient funds: {}", report.metrics.insufficient_funds);
        info!("Rejected: {}", report.metrics.rejected);
        info!("Infrastructure failures: {}", report.metrics.infrastructure_failures);
        info!("Throughput: {:.0} ops/s", report.throughput_per_sec);
        info!(
            "Latency: avg {}µs, p50 {}µs, p99 {}µs",
            report.average_latency_us, report.p50_latency_us, report.p99_latency_us
        );
        info!("Total balance: {}", report.total_balance);
    }

    if !report.violations.is_empty() {
        for violation in &report.violations {
            error!(violation = %violation, "Ledger invariant violated");
        }
        bail!("{} ledger invariant violation(s)", report.violations.len());
    }

    Ok(())
}
