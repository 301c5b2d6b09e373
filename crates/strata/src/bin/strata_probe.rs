//! # STRATA Probe
//!
//! Boots the memory system from a persisted config and runs one scenario.
//!
//! Exit codes: `0` on success, `1` on any fatal memory error (bad config,
//! exhaustion), `2` on a usage error.

use std::path::PathBuf;
use std::process::ExitCode;

use strata::{boot, init_logging, scenario, Scenario};
use strata_core::CONFIG_FILE;

fn print_usage() {
    eprintln!("Usage: strata_probe [scenario] [options]");
    eprintln!();
    eprintln!("Scenarios:");
    eprintln!("  boot       Allocate and free one block (default)");
    eprintln!("  exhaust    Overrun a small arena; exits with status 1");
    eprintln!("  states     Nested state arenas with cross-arena frees");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>  Persisted budget file (default: {CONFIG_FILE})");
    eprintln!("  --dump <dir>     Write arena dumps after the scenario");
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let option = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .map(PathBuf::from)
    };
    let config_path = option("--config").unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let dump_dir = option("--dump");

    let scenario = match args.first().filter(|a| !a.starts_with("--")) {
        None => Scenario::Boot,
        Some(name) => match name.parse::<Scenario>() {
            Ok(scenario) => scenario,
            Err(err) => {
                eprintln!("{err}");
                print_usage();
                return ExitCode::from(2);
            }
        },
    };

    init_logging();
    let system = boot(&config_path);
    tracing::info!(%scenario, config = %config_path.display(), "running probe");

    if let Err(err) = scenario.run(&system) {
        tracing::error!(error = %err, "scenario failed");
        return ExitCode::FAILURE;
    }
    if let Some(dir) = dump_dir {
        if let Err(err) = scenario::dump(&system, &dir) {
            tracing::error!(error = %err, "memory dump failed");
            return ExitCode::FAILURE;
        }
    }
    println!("{scenario}: ok");
    ExitCode::SUCCESS
}
