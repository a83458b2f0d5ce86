//! Simulator entry point: CLI wiring and config-driven scenario execution.

use std::path::Path;
use std::process;

use tracing_subscriber::EnvFilter;

use hem_sim::config::ScenarioConfig;
use hem_sim::telemetry::export_csv;

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    telemetry_out: Option<String>,
    rt: bool,
    accel_override: Option<f64>,
}

fn print_help() {
    eprintln!("hem-sim — household energy-management simulator");
    eprintln!();
    eprintln!("Usage: hem-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>        Load scenario from TOML config file");
    eprintln!(
        "  --preset <name>          Use a built-in preset ({})",
        ScenarioConfig::PRESETS.join(", ")
    );
    eprintln!("  --telemetry-out <path>   Export meter samples to CSV");
    eprintln!("  --rt                     Pace the run against the wall clock");
    eprintln!("  --accel <f64>            Override the real-time acceleration factor");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the baseline preset is used.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        telemetry_out: None,
        rt: false,
        accel_override: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --scenario requires a path argument");
                    process::exit(1);
                }
                cli.scenario_path = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --preset requires a name argument");
                    process::exit(1);
                }
                cli.preset = Some(args[i].clone());
            }
            "--telemetry-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --telemetry-out requires a path argument");
                    process::exit(1);
                }
                cli.telemetry_out = Some(args[i].clone());
            }
            "--rt" => {
                cli.rt = true;
            }
            "--accel" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --accel requires a positive number argument");
                    process::exit(1);
                }
                match args[i].parse::<f64>() {
                    Ok(a) if a > 0.0 && a.is_finite() => cli.accel_override = Some(a),
                    _ => {
                        eprintln!(
                            "error: --accel value \"{}\" is not a positive number",
                            args[i]
                        );
                        process::exit(1);
                    }
                }
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    if cli.scenario_path.is_some() && cli.preset.is_some() {
        eprintln!("error: --scenario and --preset are mutually exclusive; choose one source");
        process::exit(1);
    }

    cli
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    // Load config: --scenario takes priority, then --preset, then baseline.
    let mut scenario = if let Some(ref path) = cli.scenario_path {
        match ScenarioConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match ScenarioConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        ScenarioConfig::baseline()
    };

    // Apply CLI overrides.
    if cli.rt {
        scenario.simulation.rt = true;
    }
    if let Some(accel) = cli.accel_override {
        scenario.simulation.acceleration = accel;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let result = match hem_sim::runner::run_scenario(&scenario) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    for report in &result.reports {
        println!("{report}");
    }

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&result.telemetry, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Telemetry written to {path}");
    }
}
