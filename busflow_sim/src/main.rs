//! BusFlow DST Simulator CLI
//!
//! Run deterministic fleet-tracker scenarios against a simulated feed.

use busflow_core::TrackerConfig;
use busflow_sim::scenarios::ScenarioId;
use busflow_sim::{ScenarioResult, ScenarioRunner, SimError};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// BusFlow Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "busflow-sim")]
#[command(about = "Run deterministic simulation tests for the BusFlow tracker", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of buses in the simulated fleet
    #[arg(short = 'n', long, default_value = "20")]
    vehicles: usize,

    /// Scenario to run (steady_fleet, malformed_storm, feed_outage, stale_feed,
    /// rapid_updates, dropout, route_change, live_loop, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration of open-ended scenarios in seconds
    #[arg(short, long, default_value = "60")]
    duration: f64,

    /// Tracker config JSON (camelCase keys)
    #[arg(long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export frames of a single scenario to a JSON file for map replay
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "debug"
    } else {
        "busflow_sim=info,busflow_core=error"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Runs every requested scenario and seed; returns whether all passed.
fn run(args: &Args) -> Result<bool, SimError> {
    if !args.json {
        info!("BusFlow DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().map_err(SimError::UnknownScenario)?]
    };

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            return Err(SimError::ExportNeedsOneScenario);
        }
        return run_with_export(args, config, base_seed, scenarios[0], export_path);
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed, args.vehicles)
            .with_duration(args.duration)
            .with_config(config.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed: Vec<&ScenarioResult> = all_results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed.len(),
            "failed": failed.len(),
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "cycles": r.total_cycles,
                    "time_secs": r.final_time_secs,
                    "vehicles": r.final_vehicle_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{:#}", summary);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed.is_empty() {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed.len(), total);
            for result in &failed {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    Ok(failed.is_empty())
}

fn run_with_export(
    args: &Args,
    config: TrackerConfig,
    seed: u64,
    scenario: ScenarioId,
    export_path: &str,
) -> Result<bool, SimError> {
    info!("Running with export to: {}", export_path);

    let runner = ScenarioRunner::new(seed, args.vehicles)
        .with_duration(args.duration)
        .with_config(config);
    let (result, export) = runner.run_with_export(scenario);

    export.write_to_file(export_path)?;
    info!("Exported {} frames to {}", export.frames.len(), export_path);
    report(&result);

    Ok(result.passed)
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | cycles={} buses={} mean_error={:.2}m",
            result.scenario.name(),
            result.seed,
            result.total_cycles,
            result.final_vehicle_count,
            result.metrics.mean_error_m
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
