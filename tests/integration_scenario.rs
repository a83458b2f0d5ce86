//! End-to-end runs of the household scenario in logical time.

mod common;

use hem_sim::config::ScenarioConfig;
use hem_sim::runner::{run_scenario, HOUSE};

#[test]
fn short_run_reports_every_model() {
    let config = common::short_config();
    assert!(config.validate().is_empty());
    let result = run_scenario(&config).expect("run should succeed");

    assert_eq!(result.reports.len(), 1);
    let report = &result.reports[0];
    assert_eq!(report.model_uri, HOUSE);
    for model in [
        "house.outdoor",
        "house.solar",
        "house.heater",
        "house.meter",
        "house.lamp",
        "house.user",
    ] {
        assert!(report.find(model).is_some(), "missing report for {model}");
    }
}

#[test]
fn meter_report_carries_energy_totals() {
    let result = run_scenario(&common::short_config()).expect("run should succeed");
    let meter = result.reports[0]
        .find("house.meter")
        .expect("meter report present");
    assert!(meter.summary.contains("kWh"));
}

#[test]
fn telemetry_times_are_nondecreasing_and_within_the_run() {
    let config = common::short_config();
    let result = run_scenario(&config).expect("run should succeed");
    assert!(!result.telemetry.is_empty());

    let mut previous = config.simulation.start;
    for row in &result.telemetry {
        assert!(row.time >= previous, "sample at {} out of order", row.time);
        assert!(row.time <= config.simulation.end);
        previous = row.time;
    }
}

#[test]
fn consumed_energy_is_monotonic() {
    let result = run_scenario(&common::short_config()).expect("run should succeed");
    let mut previous = 0.0;
    for row in &result.telemetry {
        assert!(
            row.energy_consumed_wh >= previous,
            "energy must not decrease"
        );
        previous = row.energy_consumed_wh;
    }
}

#[test]
fn consumption_includes_the_base_load() {
    let config = common::short_config();
    let result = run_scenario(&config).expect("run should succeed");
    for row in &result.telemetry {
        assert!(row.consumption_w >= config.meter.base_load_w);
    }
}

#[test]
fn two_runs_of_one_config_are_identical() {
    let config = common::short_config();
    let a = run_scenario(&config).expect("run should succeed");
    let b = run_scenario(&config).expect("run should succeed");

    assert_eq!(a.telemetry.len(), b.telemetry.len());
    for (ra, rb) in a.telemetry.iter().zip(&b.telemetry) {
        assert_eq!(ra.time, rb.time);
        assert_eq!(ra.consumption_w, rb.consumption_w);
        assert_eq!(ra.production_w, rb.production_w);
        assert_eq!(ra.net_w, rb.net_w);
    }
    assert_eq!(a.reports[0].to_string(), b.reports[0].to_string());
}

#[test]
fn full_day_baseline_runs_to_completion() {
    let config = ScenarioConfig::baseline();
    let result = run_scenario(&config).expect("baseline run should succeed");
    // Sampled every 5 minutes across 24 hours.
    assert!(result.telemetry.len() >= 288);
    let last = result.telemetry.last().expect("samples present");
    assert!(last.energy_consumed_wh > 0.0);
}
