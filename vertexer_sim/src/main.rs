//! Vertexer simulation CLI
//!
//! Runs the vertexing scenarios over one or more seeds.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use vertexer_core::VertexConfig;
use vertexer_env::GeometryConfig;
use vertexer_sim::{ScenarioId, ScenarioResult, ScenarioRunner, SimError};

/// Vertexer Deterministic Simulation CLI
#[derive(Parser, Debug)]
#[command(name = "vertexer-sim")]
#[command(about = "Run deterministic vertexing scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (converging_pair, hammer, poor_vertex, neutrino_like, dead_gap, crossing, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Number of 2D vertexing passes
    #[arg(short, long, default_value = "2")]
    passes: u16,

    /// Vertex engine config as JSON; missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detector geometry as JSON; defaults to the three-plane detector
    #[arg(short, long)]
    geometry: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the reconstructed event of a single scenario to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<VertexConfig, SimError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(VertexConfig::from_json_str(&text)?)
        }
        None => Ok(VertexConfig::default()),
    }
}

fn load_geometry(path: Option<&PathBuf>) -> Result<GeometryConfig, SimError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(GeometryConfig::default()),
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Vertexer Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed");
        std::process::exit(1);
    }

    let (config, geometry) = match (load_config(args.config.as_ref()), load_geometry(args.geometry.as_ref())) {
        (Ok(config), Ok(geometry)) => (config, geometry),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(1, |d| d.as_nanos() as u64)
    } else {
        args.seed
    };

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_passes(args.passes)
            .with_config(config.clone())
            .with_geometry(geometry.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED: {} 2D / {} 3D vertices",
                        scenario.name(),
                        seed,
                        result.metrics.vx2_final,
                        result.metrics.vx3_final
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    if let (Some(path), Some(result)) = (&args.export, all_results.first()) {
        match result.export.write_to_file(path) {
            Ok(()) => info!("Exported {} to {}", result.scenario.name(), path.display()),
            Err(e) => {
                error!("Export failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
