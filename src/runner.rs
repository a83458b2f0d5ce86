//! Scenario assembly and execution: builds the household architecture from a
//! [`ScenarioConfig`] and drives it in logical time, real time, or as a
//! two-component distributed run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};

use thiserror::Error;
use tracing::info;

use crate::architecture::{
    Architecture, ArchitectureError, AtomicModelDescriptor, Capabilities, Connection,
    CoupledModelDescriptor, EventSource, ImportedEventRoute, ModelFactories, VariableBinding,
    VariableDecl, VariableEnd,
};
use crate::config::{ActionConfig, ScenarioConfig};
use crate::engine::{RtEngine, SimulationError, SimulationReport, SystemClock};
use crate::household::lamp::{self, LampCommand};
use crate::household::{
    heater, meter, outdoor, solar, ElectricMeterModel, HeaterModel, HeaterProgramModel, LampModel,
    LampUserModel, OutdoorModel, SolarPanelModel,
};
use crate::model::{AtomicModelI, RunParameters};
use crate::plugin::{
    AtomicSimulatorPlugin, CoordinatorPlugin, InterComponentRoute, LocalPort, PluginError,
    SupervisorPlugin,
};
use crate::telemetry::{telemetry_log, MeterRow, TelemetryLog};
use crate::time::{Duration, Time};

/// Root URI of the household component.
pub const HOUSE: &str = "house";
/// Root URI of the remote controller component in distributed runs.
pub const CONTROLLER: &str = "controller";

/// Wall-clock lead the distributed start barrier is placed at.
const START_LEAD: StdDuration = StdDuration::from_millis(250);

/// A failure anywhere between config and finished run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("architecture rejected with {} defect(s), first: {}", errors.len(), errors[0])]
    Architecture { errors: Vec<ArchitectureError> },
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl From<Vec<ArchitectureError>> for RunnerError {
    fn from(errors: Vec<ArchitectureError>) -> Self {
        RunnerError::Architecture { errors }
    }
}

/// Outcome of one scenario run.
pub struct ScenarioResult {
    /// One report per component, household first.
    pub reports: Vec<SimulationReport>,
    /// Meter samples accumulated over the run.
    pub telemetry: Vec<MeterRow>,
}

fn house_uri(model: &str) -> String {
    format!("{HOUSE}.{model}")
}

/// Blueprint of the household: outdoor, solar, heater, meter, lamp, and the
/// scripted lamp user, wired under one coupled root.
///
/// With `accepts_remote_commands`, heater overrides arriving at the root
/// boundary are routed to the heater, which is how the distributed
/// controller reaches in.
pub fn household_architecture(
    config: &ScenarioConfig,
    accepts_remote_commands: bool,
) -> Architecture {
    let hioa = Capabilities {
        hioa: true,
        real_time: config.simulation.rt,
    };
    let plain = Capabilities {
        hioa: false,
        real_time: config.simulation.rt,
    };
    let mut arch = Architecture::new(HOUSE, config.simulation.time_unit);

    arch.add_atomic(AtomicModelDescriptor {
        capabilities: hioa,
        exported_variables: vec![VariableDecl::new(outdoor::EXTERNAL_TEMPERATURE, "f64")],
        ..AtomicModelDescriptor::new(house_uri("outdoor"), "Outdoor")
    });
    arch.add_atomic(AtomicModelDescriptor {
        capabilities: hioa,
        exported_variables: vec![VariableDecl::new(solar::PRODUCTION, "f64")],
        ..AtomicModelDescriptor::new(house_uri("solar"), "SolarPanel")
    });
    arch.add_atomic(AtomicModelDescriptor {
        capabilities: hioa,
        imported_events: vec![heater::HEAT.into(), heater::DO_NOT_HEAT.into()],
        imported_variables: vec![VariableDecl::new(heater::OUTDOOR_TEMPERATURE, "f64")],
        exported_variables: vec![
            VariableDecl::new(heater::ROOM_TEMPERATURE, "f64"),
            VariableDecl::new(heater::HEATER_POWER, "f64"),
        ],
        ..AtomicModelDescriptor::new(house_uri("heater"), "Heater")
    });
    arch.add_atomic(AtomicModelDescriptor {
        capabilities: hioa,
        imported_events: vec![lamp::LAMP_POWER.into()],
        imported_variables: vec![
            VariableDecl::new(meter::PRODUCTION_IN, "f64"),
            VariableDecl::new(meter::HEATER_POWER_IN, "f64"),
        ],
        exported_variables: vec![VariableDecl::new(meter::TOTAL_CONSUMPTION, "f64")],
        ..AtomicModelDescriptor::new(house_uri("meter"), "ElectricMeter")
    });
    arch.add_atomic(AtomicModelDescriptor {
        capabilities: plain,
        imported_events: vec![
            lamp::SWITCH_ON.into(),
            lamp::SWITCH_OFF.into(),
            lamp::SET_HIGH.into(),
            lamp::SET_LOW.into(),
        ],
        exported_events: vec![lamp::LAMP_POWER.into()],
        ..AtomicModelDescriptor::new(house_uri("lamp"), "Lamp")
    });
    arch.add_atomic(AtomicModelDescriptor {
        capabilities: plain,
        exported_events: vec![
            lamp::SWITCH_ON.into(),
            lamp::SWITCH_OFF.into(),
            lamp::SET_HIGH.into(),
            lamp::SET_LOW.into(),
        ],
        ..AtomicModelDescriptor::new(house_uri("user"), "LampUser")
    });

    let user_to_lamp = |kind: &str| Connection {
        source: EventSource {
            model: house_uri("user"),
            kind: kind.into(),
        },
        sinks: vec![house_uri("lamp")],
    };
    let mut root = CoupledModelDescriptor {
        capabilities: hioa,
        submodels: vec![
            house_uri("outdoor"),
            house_uri("solar"),
            house_uri("heater"),
            house_uri("meter"),
            house_uri("lamp"),
            house_uri("user"),
        ],
        connections: vec![
            user_to_lamp(lamp::SWITCH_ON),
            user_to_lamp(lamp::SWITCH_OFF),
            user_to_lamp(lamp::SET_HIGH),
            user_to_lamp(lamp::SET_LOW),
            Connection {
                source: EventSource {
                    model: house_uri("lamp"),
                    kind: lamp::LAMP_POWER.into(),
                },
                sinks: vec![house_uri("meter")],
            },
        ],
        variable_bindings: vec![
            VariableBinding {
                source: VariableEnd {
                    model: house_uri("outdoor"),
                    name: outdoor::EXTERNAL_TEMPERATURE.into(),
                },
                sinks: vec![VariableEnd {
                    model: house_uri("heater"),
                    name: heater::OUTDOOR_TEMPERATURE.into(),
                }],
            },
            VariableBinding {
                source: VariableEnd {
                    model: house_uri("solar"),
                    name: solar::PRODUCTION.into(),
                },
                sinks: vec![VariableEnd {
                    model: house_uri("meter"),
                    name: meter::PRODUCTION_IN.into(),
                }],
            },
            VariableBinding {
                source: VariableEnd {
                    model: house_uri("heater"),
                    name: heater::HEATER_POWER.into(),
                },
                sinks: vec![VariableEnd {
                    model: house_uri("meter"),
                    name: meter::HEATER_POWER_IN.into(),
                }],
            },
        ],
        ..CoupledModelDescriptor::new(HOUSE)
    };
    if accepts_remote_commands {
        for kind in [heater::HEAT, heater::DO_NOT_HEAT] {
            root.imported_events.push(ImportedEventRoute {
                kind: kind.into(),
                sinks: vec![house_uri("heater")],
            });
        }
    }
    arch.add_coupled(root);
    arch
}

/// Blueprint of the remote controller: a single scripted atomic root whose
/// heater overrides leave through the component boundary.
pub fn controller_architecture(config: &ScenarioConfig) -> Architecture {
    let mut arch = Architecture::new(CONTROLLER, config.simulation.time_unit);
    arch.add_atomic(AtomicModelDescriptor {
        capabilities: Capabilities {
            hioa: false,
            real_time: true,
        },
        exported_events: vec![heater::HEAT.into(), heater::DO_NOT_HEAT.into()],
        ..AtomicModelDescriptor::new(CONTROLLER, "HeaterProgram")
    });
    arch
}

fn lamp_schedule(actions: &[ActionConfig]) -> Vec<(f64, LampCommand)> {
    actions
        .iter()
        .map(|a| {
            let command = match a.command.as_str() {
                lamp::SWITCH_ON => LampCommand::SwitchOn,
                lamp::SWITCH_OFF => LampCommand::SwitchOff,
                lamp::SET_HIGH => LampCommand::SetHigh,
                // validate() ran first, so only known commands remain.
                _ => LampCommand::SetLow,
            };
            (a.at, command)
        })
        .collect()
}

fn heater_program(actions: &[ActionConfig]) -> Vec<(f64, bool)> {
    actions
        .iter()
        .map(|a| (a.at, a.command == heater::HEAT))
        .collect()
}

/// Model constructors for the household classes, parameterised by `config`.
///
/// The meter factory captures `log`, so every composed meter samples into
/// the same shared telemetry buffer.
pub fn household_factories(config: &ScenarioConfig, log: TelemetryLog) -> ModelFactories {
    let mut factories = ModelFactories::new();
    let s = &config.simulation;
    let step = s.step;
    let window = s.end - s.start;

    let o = config.outdoor.clone();
    factories.register("Outdoor", move |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(OutdoorModel::new(
            &d.uri,
            unit,
            Duration::new(step, unit),
            Duration::new(window, unit),
            o.mean_c,
            o.amplitude_c,
        )) as Box<dyn AtomicModelI>)
    });

    let sol = config.solar.clone();
    let seed = s.seed;
    factories.register("SolarPanel", move |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(SolarPanelModel::new(
            &d.uri,
            unit,
            Duration::new(step, unit),
            Duration::new(window, unit),
            sol.peak_w,
            sol.sunrise_hour,
            sol.sunset_hour,
            sol.noise_std,
            seed,
        )) as Box<dyn AtomicModelI>)
    });

    let h = config.heater.clone();
    factories.register("Heater", move |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(HeaterModel::new(
            &d.uri,
            unit,
            Duration::new(step, unit),
            Duration::new(window, unit),
            h.max_power_w,
            h.heat_rate_c_per_hour,
            h.loss_rate_per_hour,
            h.setpoint_c,
            h.hysteresis_c,
            h.initial_room_c,
        )) as Box<dyn AtomicModelI>)
    });

    let m = config.meter.clone();
    factories.register("ElectricMeter", move |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(ElectricMeterModel::new(
            &d.uri,
            unit,
            Duration::new(step, unit),
            Duration::new(window, unit),
            m.base_load_w,
            log.clone(),
        )) as Box<dyn AtomicModelI>)
    });

    let l = config.lamp.clone();
    factories.register("Lamp", move |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(LampModel::new(&d.uri, unit, l.low_watts, l.high_watts))
            as Box<dyn AtomicModelI>)
    });

    let schedule = lamp_schedule(&config.lamp.schedule);
    factories.register("LampUser", move |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(LampUserModel::new(&d.uri, unit, schedule.clone())) as Box<dyn AtomicModelI>)
    });

    let program = heater_program(&config.controller.program);
    factories.register("HeaterProgram", move |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(HeaterProgramModel::new(&d.uri, unit, program.clone()))
            as Box<dyn AtomicModelI>)
    });

    factories
}

/// Run-parameter overrides staged in `config`, keyed by model URI.
pub fn run_parameters(config: &ScenarioConfig) -> RunParameters {
    let mut params = RunParameters::default();
    for (uri, overrides) in &config.overrides {
        for (name, &value) in overrides {
            params.set(uri.clone(), name.clone(), value);
        }
    }
    params
}

/// Runs the configured scenario to completion.
///
/// Dispatches on the simulation section: logical time by default, wall-clock
/// paced with `rt = true`, and a two-component supervisor-driven run with
/// `distributed = true`.
///
/// # Errors
///
/// Surfaces architecture defects, run failures, and plugin lifecycle errors.
/// Call [`ScenarioConfig::validate`] first; this function assumes a valid
/// config.
pub fn run_scenario(config: &ScenarioConfig) -> Result<ScenarioResult, RunnerError> {
    if config.simulation.distributed {
        return run_distributed(config);
    }

    let s = &config.simulation;
    let unit = s.time_unit;
    let start = Time::new(s.start, unit);
    let end = Time::new(s.end, unit);
    let log = telemetry_log();
    let arch = household_architecture(config, false);
    let factories = household_factories(config, log.clone());
    let mut simulation = arch.construct_simulator(&factories, &run_parameters(config))?;

    if s.rt {
        let mut engine = RtEngine::new(simulation, s.acceleration, Box::new(SystemClock::new()))?;
        engine.run(Instant::now(), start, end.sub(start))?;
        simulation = engine.into_simulation();
    } else {
        simulation.do_stand_alone_simulation(start, end)?;
    }

    let report = simulation.final_report();
    Ok(ScenarioResult {
        reports: vec![report],
        telemetry: drain_log(&log),
    })
}

/// Runs household and controller as two plugin components over in-process
/// ports, released together on an epoch start barrier.
fn run_distributed(config: &ScenarioConfig) -> Result<ScenarioResult, RunnerError> {
    let s = &config.simulation;
    let unit = s.time_unit;
    let start = Time::new(s.start, unit);
    let duration = Duration::new(s.end - s.start, unit);
    let log = telemetry_log();

    let house = Arc::new(Mutex::new(AtomicSimulatorPlugin::new(
        household_architecture(config, true),
        household_factories(config, log.clone()),
        s.acceleration,
    )));
    let controller = Arc::new(Mutex::new(AtomicSimulatorPlugin::new(
        controller_architecture(config),
        household_factories(config, log.clone()),
        s.acceleration,
    )));
    let house_port = LocalPort::new(Arc::clone(&house));
    let controller_port = LocalPort::new(Arc::clone(&controller));

    let mut coordinator = CoordinatorPlugin::new();
    coordinator.register_component(HOUSE, Arc::new(house_port.clone()));
    coordinator.register_component(CONTROLLER, Arc::new(controller_port.clone()));
    for kind in [heater::HEAT, heater::DO_NOT_HEAT] {
        coordinator.add_route(InterComponentRoute {
            source: CONTROLLER.into(),
            kind: kind.into(),
            sinks: vec![HOUSE.into()],
        });
    }
    let coordinator = Arc::new(coordinator);
    controller
        .lock()
        .expect("plugin lock poisoned")
        .set_uplink(coordinator);

    let mut supervisor = SupervisorPlugin::new(START_LEAD);
    supervisor.add_component(Arc::new(house_port));
    supervisor.add_component(Arc::new(controller_port));

    let mut params = HashMap::new();
    params.insert(HOUSE.to_string(), run_parameters(config));
    info!(
        components = supervisor.component_count(),
        acceleration = s.acceleration,
        "distributed run starting"
    );
    let reports = supervisor.run(&params, start, duration)?;

    Ok(ScenarioResult {
        reports,
        telemetry: drain_log(&log),
    })
}

fn drain_log(log: &TelemetryLog) -> Vec<MeterRow> {
    std::mem::take(&mut *log.lock().expect("telemetry lock poisoned"))
}
