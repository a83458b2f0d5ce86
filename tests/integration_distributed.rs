//! Two-component distributed runs over the in-process plugin ports.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use hem_sim::architecture::ModelFactories;
use hem_sim::config::{ActionConfig, ScenarioConfig};
use hem_sim::plugin::{
    AtomicSimulatorPlugin, LocalPort, PluginError, SimulatorPluginI, SupervisorPlugin,
};
use hem_sim::runner::{
    controller_architecture, household_architecture, household_factories, run_scenario, CONTROLLER,
    HOUSE,
};
use hem_sim::telemetry::telemetry_log;
use hem_sim::time::{Duration, Time, TimeUnit};

/// Ten simulated minutes at 600x, so the paced run takes about a second.
fn fast_distributed_config() -> ScenarioConfig {
    let mut config = ScenarioConfig::distributed();
    config.simulation.end = 10.0;
    config.simulation.acceleration = 600.0;
    config.lamp.schedule = vec![
        ActionConfig {
            at: 1.0,
            command: "switch_on".into(),
        },
        ActionConfig {
            at: 8.0,
            command: "switch_off".into(),
        },
    ];
    config.controller.program = vec![
        ActionConfig {
            at: 2.0,
            command: "do_not_heat".into(),
        },
        ActionConfig {
            at: 6.0,
            command: "heat".into(),
        },
    ];
    config
}

#[test]
fn distributed_run_reports_both_components() {
    let config = fast_distributed_config();
    assert!(config.validate().is_empty());
    let result = run_scenario(&config).expect("distributed run should succeed");

    assert_eq!(result.reports.len(), 2);
    assert_eq!(result.reports[0].model_uri, HOUSE);
    assert_eq!(result.reports[1].model_uri, CONTROLLER);
    assert!(!result.telemetry.is_empty(), "the meter keeps sampling");
}

#[test]
fn controller_issues_its_whole_program() {
    let config = fast_distributed_config();
    let result = run_scenario(&config).expect("distributed run should succeed");
    let controller = result.reports[1]
        .find(CONTROLLER)
        .expect("controller report present");
    assert!(
        controller.summary.contains("2 of 2"),
        "got: {}",
        controller.summary
    );
}

#[test]
fn plugin_lifecycle_rejects_out_of_order_calls() {
    let config = fast_distributed_config();
    let mut plugin = AtomicSimulatorPlugin::new(
        controller_architecture(&config),
        household_factories(&config, telemetry_log()),
        config.simulation.acceleration,
    );

    // Start before construct.
    let result = plugin.start_simulation(
        0,
        Time::new(0.0, TimeUnit::Minutes),
        Duration::new(1.0, TimeUnit::Minutes),
    );
    assert!(matches!(
        result.err(),
        Some(PluginError::InvalidState { operation, .. }) if operation == "start_simulation"
    ));

    plugin.construct_simulator().expect("construction succeeds");

    // Constructing twice is illegal.
    assert!(matches!(
        plugin.construct_simulator().err(),
        Some(PluginError::InvalidState { .. })
    ));

    // No run to receive events yet.
    let event = Box::new(hem_sim::household::heater::HeaterCommandEvent::heat(
        Time::new(0.0, TimeUnit::Minutes),
    ));
    assert!(matches!(
        plugin.deliver_event(HOUSE, event).err(),
        Some(PluginError::NotRunning { .. })
    ));
}

#[test]
fn failed_construction_aborts_the_whole_run() {
    let config = fast_distributed_config();
    let house = Arc::new(Mutex::new(AtomicSimulatorPlugin::new(
        household_architecture(&config, true),
        household_factories(&config, telemetry_log()),
        config.simulation.acceleration,
    )));
    // No factories registered: this component cannot be composed.
    let broken = Arc::new(Mutex::new(AtomicSimulatorPlugin::new(
        controller_architecture(&config),
        ModelFactories::new(),
        config.simulation.acceleration,
    )));

    let mut supervisor = SupervisorPlugin::new(StdDuration::from_millis(50));
    supervisor.add_component(Arc::new(LocalPort::new(Arc::clone(&house))));
    supervisor.add_component(Arc::new(LocalPort::new(Arc::clone(&broken))));

    let result = supervisor.run(
        &Default::default(),
        Time::new(0.0, TimeUnit::Minutes),
        Duration::new(10.0, TimeUnit::Minutes),
    );
    assert!(matches!(
        result.err(),
        Some(PluginError::Architecture { uri, .. }) if uri == CONTROLLER
    ));

    // The healthy component was composed but never started.
    assert!(matches!(
        house.lock().unwrap().poll_completion().err(),
        Some(PluginError::InvalidState { .. })
    ));
}

#[test]
fn component_runs_standalone_through_the_plugin_lifecycle() {
    let config = fast_distributed_config();
    let mut plugin = AtomicSimulatorPlugin::new(
        controller_architecture(&config),
        household_factories(&config, telemetry_log()),
        6000.0,
    );
    plugin.construct_simulator().expect("construction succeeds");
    plugin
        .start_simulation(
            // An instant in the past starts immediately.
            0,
            Time::new(0.0, TimeUnit::Minutes),
            Duration::new(10.0, TimeUnit::Minutes),
        )
        .expect("start succeeds");
    plugin.wait_for_completion().expect("run succeeds");
    let report = plugin.final_report().expect("report available");
    assert_eq!(report.model_uri, CONTROLLER);
    assert!(report.summary.contains("2 of 2"));
}
