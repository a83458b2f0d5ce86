//! Composition-level behavior: validation soundness, fixpoint deadlocks,
//! and same-instant event ordering across a coupled model.

mod common;

use hem_sim::architecture::{
    Architecture, ArchitectureError, AtomicModelDescriptor, Capabilities, Connection, EventSource,
    ModelFactories, VariableBinding, VariableDecl, VariableEnd,
};
use hem_sim::architecture::CoupledModelDescriptor;
use hem_sim::household::lamp::{self, LampCommand, LampModel, LampUserModel};
use hem_sim::household::heater;
use hem_sim::model::{AtomicModelI, RunParameters};
use hem_sim::runner::{household_architecture, household_factories};
use hem_sim::telemetry::telemetry_log;
use hem_sim::time::{Time, TimeUnit};

fn minutes(v: f64) -> Time {
    Time::new(v, TimeUnit::Minutes)
}

#[test]
fn valid_blueprint_composes_without_errors() {
    let config = common::short_config();
    let arch = household_architecture(&config, false);
    assert!(arch.validate().is_empty());

    let factories = household_factories(&config, telemetry_log());
    let simulation = arch.construct_simulator(&factories, &RunParameters::default());
    assert!(simulation.is_ok(), "{:?}", simulation.err());
}

#[test]
fn construction_refuses_an_invalid_blueprint() {
    let config = common::short_config();
    let mut arch = household_architecture(&config, false);
    // An import with no binding anywhere makes the blueprint unusable.
    arch.add_atomic(AtomicModelDescriptor {
        imported_variables: vec![VariableDecl::new("orphan_in", "f64")],
        ..AtomicModelDescriptor::new("house.stray", "Heater")
    });
    let mut root = arch.coupled("house").cloned().expect("root present");
    root.submodels.push("house.stray".into());
    arch.add_coupled(root);

    let factories = household_factories(&config, telemetry_log());
    let result = arch.construct_simulator(&factories, &RunParameters::default());
    let errors = result.err().expect("construction must fail");
    assert!(errors
        .iter()
        .any(|e| matches!(e, ArchitectureError::UnboundVariable { model, .. } if model == "house.stray")));
}

fn heater_descriptor(uri: &str) -> AtomicModelDescriptor {
    AtomicModelDescriptor {
        capabilities: Capabilities {
            hioa: true,
            real_time: false,
        },
        imported_events: vec![heater::HEAT.into(), heater::DO_NOT_HEAT.into()],
        imported_variables: vec![VariableDecl::new(heater::OUTDOOR_TEMPERATURE, "f64")],
        exported_variables: vec![
            VariableDecl::new(heater::ROOM_TEMPERATURE, "f64"),
            VariableDecl::new(heater::HEATER_POWER, "f64"),
        ],
        ..AtomicModelDescriptor::new(uri, "Heater")
    }
}

#[test]
fn cyclic_variable_dependencies_deadlock_the_fixpoint() {
    // Two heaters each read the other's room temperature as their "outdoor"
    // input: statically well-formed, dynamically unresolvable.
    let cross = |a: &str, b: &str| VariableBinding {
        source: VariableEnd {
            model: a.into(),
            name: heater::ROOM_TEMPERATURE.into(),
        },
        sinks: vec![VariableEnd {
            model: b.into(),
            name: heater::OUTDOOR_TEMPERATURE.into(),
        }],
    };
    let mut arch = Architecture::new("pair", TimeUnit::Minutes);
    arch.add_atomic(heater_descriptor("pair.a"));
    arch.add_atomic(heater_descriptor("pair.b"));
    arch.add_coupled(CoupledModelDescriptor {
        submodels: vec!["pair.a".into(), "pair.b".into()],
        variable_bindings: vec![cross("pair.a", "pair.b"), cross("pair.b", "pair.a")],
        ..CoupledModelDescriptor::new("pair")
    });
    assert!(arch.validate().is_empty(), "the cycle is not a static defect");

    let config = common::short_config();
    let factories = household_factories(&config, telemetry_log());
    let mut simulation = arch
        .construct_simulator(&factories, &RunParameters::default())
        .expect("composition should succeed");
    let result = simulation.do_stand_alone_simulation(minutes(0.0), minutes(60.0));
    assert!(
        matches!(
            result,
            Err(hem_sim::engine::SimulationError::FixpointDeadlock { .. })
        ),
        "got {result:?}"
    );
}

#[test]
fn switch_off_applies_before_switch_on_across_the_coupling() {
    // Two scripted users command the lamp at the same instant; the batch is
    // ordered so switch-off runs first and the switch-on lands on an off
    // lamp, leaving it on.
    let user = |uri: &str, kind: &str| AtomicModelDescriptor {
        exported_events: vec![kind.into()],
        ..AtomicModelDescriptor::new(uri, if kind == lamp::SWITCH_ON { "UserOn" } else { "UserOff" })
    };
    let mut arch = Architecture::new("room", TimeUnit::Minutes);
    arch.add_atomic(user("room.on", lamp::SWITCH_ON));
    arch.add_atomic(user("room.off", lamp::SWITCH_OFF));
    arch.add_atomic(AtomicModelDescriptor {
        imported_events: vec![lamp::SWITCH_ON.into(), lamp::SWITCH_OFF.into()],
        exported_events: vec![lamp::LAMP_POWER.into()],
        ..AtomicModelDescriptor::new("room.lamp", "Lamp")
    });
    arch.add_coupled(CoupledModelDescriptor {
        submodels: vec!["room.on".into(), "room.off".into(), "room.lamp".into()],
        connections: vec![
            Connection {
                source: EventSource {
                    model: "room.on".into(),
                    kind: lamp::SWITCH_ON.into(),
                },
                sinks: vec!["room.lamp".into()],
            },
            Connection {
                source: EventSource {
                    model: "room.off".into(),
                    kind: lamp::SWITCH_OFF.into(),
                },
                sinks: vec!["room.lamp".into()],
            },
        ],
        ..CoupledModelDescriptor::new("room")
    });
    assert!(arch.validate().is_empty());

    let mut factories = ModelFactories::new();
    factories.register("UserOn", |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(LampUserModel::new(
            &d.uri,
            unit,
            vec![(10.0, LampCommand::SwitchOn)],
        )) as Box<dyn AtomicModelI>)
    });
    factories.register("UserOff", |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(LampUserModel::new(
            &d.uri,
            unit,
            vec![(10.0, LampCommand::SwitchOff)],
        )) as Box<dyn AtomicModelI>)
    });
    factories.register("Lamp", |d: &AtomicModelDescriptor, unit| {
        Ok(Box::new(LampModel::new(&d.uri, unit, 20.0, 60.0)) as Box<dyn AtomicModelI>)
    });

    let mut simulation = arch
        .construct_simulator(&factories, &RunParameters::default())
        .expect("composition should succeed");
    simulation
        .do_stand_alone_simulation(minutes(0.0), minutes(20.0))
        .expect("run should succeed");

    let lamp_report = simulation
        .final_report()
        .find("room.lamp")
        .cloned()
        .expect("lamp report present");
    assert!(
        lamp_report.summary.contains("Low"),
        "switch-on must land after switch-off, got: {}",
        lamp_report.summary
    );
}

#[test]
fn run_parameters_reach_the_composed_models() {
    let config = common::short_config();
    let arch = household_architecture(&config, false);
    let factories = household_factories(&config, telemetry_log());

    let mut params = RunParameters::default();
    params.set("house.lamp", "low_watts", 5.0);
    assert!(arch.construct_simulator(&factories, &params).is_ok());

    let mut bad = RunParameters::default();
    bad.set("house.lamp", "wattage", 5.0);
    let result = arch.construct_simulator(&factories, &bad);
    let errors = result.err().expect("unknown parameter must be rejected");
    assert!(errors
        .iter()
        .any(|e| matches!(e, ArchitectureError::RunParameter(_))));

    // A typo in the model URI must not degrade to a silent no-op.
    let mut misaddressed = RunParameters::default();
    misaddressed.set("house.heter", "setpoint_c", 22.0);
    let result = arch.construct_simulator(&factories, &misaddressed);
    let errors = result.err().expect("unknown model URI must be rejected");
    assert!(errors
        .iter()
        .any(|e| matches!(e, ArchitectureError::RunParameter(_))));
}
