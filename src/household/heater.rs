//! Electric heater: hysteresis thermostat with an Euler room-temperature
//! update, reading the outdoor temperature from a bound variable.

use std::any::Any;

use tracing::trace;

use crate::engine::SimulationReport;
use crate::event::EventI;
use crate::household::hours_per_unit;
use crate::model::{AtomicModelCore, AtomicModelI, FixpointStatus, RunParameterError, RunParameters};
use crate::time::{Duration, Time, TimeUnit};
use crate::variable::{
    ImportedVariable, LinearInterpolator, StepInterpolator, ValueHistory, Variable, VariableHandle,
    VariableRegistry,
};

pub const HEAT: &str = "heat";
pub const DO_NOT_HEAT: &str = "do_not_heat";
pub const ROOM_TEMPERATURE: &str = "room_temperature";
pub const HEATER_POWER: &str = "heater_power";
/// Import slot name for the outdoor temperature.
pub const OUTDOOR_TEMPERATURE: &str = "outdoor_temperature";

/// Override command forcing the heater on or off, e.g. from a remote
/// controller. `do_not_heat` outranks `heat` at the same instant.
#[derive(Debug, Clone)]
pub struct HeaterCommandEvent {
    heat: bool,
    at: Time,
}

impl HeaterCommandEvent {
    pub fn heat(at: Time) -> Self {
        Self { heat: true, at }
    }

    pub fn do_not_heat(at: Time) -> Self {
        Self { heat: false, at }
    }
}

impl EventI for HeaterCommandEvent {
    fn kind(&self) -> &str {
        if self.heat { HEAT } else { DO_NOT_HEAT }
    }

    fn time_of_occurrence(&self) -> Time {
        self.at
    }

    fn has_priority_over(&self, other: &dyn EventI) -> bool {
        !self.heat && other.kind() == HEAT
    }

    fn execute_on(&self, model: &mut dyn AtomicModelI) {
        let uri = model.uri().to_string();
        let heater = model
            .as_any_mut()
            .downcast_mut::<HeaterModel>()
            .unwrap_or_else(|| panic!("{} event delivered to non-heater model {uri}", self.kind()));
        heater.control = if self.heat {
            HeaterControl::ForcedOn
        } else {
            HeaterControl::ForcedOff
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaterControl {
    /// Built-in thermostat decides.
    Auto,
    ForcedOn,
    ForcedOff,
}

/// Fixed, thin room thermal model: one lumped temperature, explicit Euler.
pub struct HeaterModel {
    core: AtomicModelCore,
    step: Duration,
    max_power_w: f64,
    /// Temperature gain at full power, in °C per hour.
    heat_rate_c_per_hour: f64,
    /// Leakage toward the outdoor temperature, per hour.
    loss_rate_per_hour: f64,
    setpoint_c: f64,
    hysteresis_c: f64,
    initial_room_c: f64,
    control: HeaterControl,
    heating: bool,
    room_c: f64,
    room: VariableHandle<f64>,
    power: VariableHandle<f64>,
    outdoor: ImportedVariable<f64>,
    registry: VariableRegistry,
    last_sample: Time,
    next_sample: Time,
    published: bool,
    energy_wh: f64,
}

impl HeaterModel {
    /// Creates the heater; variables stay uninitialised until the fixpoint
    /// rounds run.
    ///
    /// # Panics
    ///
    /// Panics if `step` is zero or infinite, or any physical parameter is
    /// not positive.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uri: impl Into<String>,
        unit: TimeUnit,
        step: Duration,
        history_window: Duration,
        max_power_w: f64,
        heat_rate_c_per_hour: f64,
        loss_rate_per_hour: f64,
        setpoint_c: f64,
        hysteresis_c: f64,
        initial_room_c: f64,
    ) -> Self {
        let uri = uri.into();
        assert!(
            step.value() > 0.0 && !step.is_infinite(),
            "heater model {uri}: step must be positive and finite"
        );
        assert!(
            max_power_w > 0.0 && heat_rate_c_per_hour > 0.0 && loss_rate_per_hour > 0.0,
            "heater model {uri}: power, heat rate and loss rate must be > 0"
        );
        assert!(hysteresis_c > 0.0, "heater model {uri}: hysteresis must be > 0");

        let room = VariableHandle::new(
            Variable::new(ROOM_TEMPERATURE, uri.clone(), unit)
                .with_history(ValueHistory::new(history_window, Box::new(LinearInterpolator))),
        );
        let power = VariableHandle::new(
            Variable::new(HEATER_POWER, uri.clone(), unit)
                .with_history(ValueHistory::new(history_window, Box::new(StepInterpolator))),
        );
        let outdoor = ImportedVariable::new(OUTDOOR_TEMPERATURE);
        let mut registry = VariableRegistry::new(uri.clone());
        registry.register_exported(ROOM_TEMPERATURE, &room);
        registry.register_exported(HEATER_POWER, &power);
        registry.register_imported(OUTDOOR_TEMPERATURE, &outdoor);

        Self {
            core: AtomicModelCore::new(uri, unit),
            step,
            max_power_w,
            heat_rate_c_per_hour,
            loss_rate_per_hour,
            setpoint_c,
            hysteresis_c,
            initial_room_c,
            control: HeaterControl::Auto,
            heating: false,
            room_c: initial_room_c,
            room,
            power,
            outdoor,
            registry,
            last_sample: Time::zero(unit),
            next_sample: Time::zero(unit),
            published: false,
            energy_wh: 0.0,
        }
    }

    pub fn room_temperature(&self) -> f64 {
        self.room_c
    }

    fn decide_heating(&mut self) {
        self.heating = match self.control {
            HeaterControl::ForcedOn => true,
            HeaterControl::ForcedOff => false,
            HeaterControl::Auto => {
                if self.room_c < self.setpoint_c - self.hysteresis_c {
                    true
                } else if self.room_c > self.setpoint_c + self.hysteresis_c {
                    false
                } else {
                    self.heating
                }
            }
        };
    }
}

impl AtomicModelI for HeaterModel {
    fn core(&self) -> &AtomicModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AtomicModelCore {
        &mut self.core
    }

    fn initialise_state(&mut self, initial_time: Time) {
        self.core.initialise(initial_time);
        self.room.reinitialise();
        self.power.reinitialise();
        self.control = HeaterControl::Auto;
        self.heating = false;
        self.room_c = self.initial_room_c;
        self.last_sample = initial_time;
        self.next_sample = initial_time.add(self.step);
        self.published = false;
        self.energy_wh = 0.0;
    }

    fn time_advance(&self) -> Duration {
        // Remainder to the fixed integration grid; off-grid override
        // commands must not shift it.
        self.next_sample.sub(self.core.current_time())
    }

    fn output(&mut self) -> Vec<Box<dyn EventI>> {
        Vec::new()
    }

    fn internal_transition(&mut self, elapsed: Duration) {
        self.core.advance_time(elapsed);
        let now = self.core.current_time();
        let dt_hours = now.sub(self.last_sample).value() * hours_per_unit(self.time_unit());
        let outdoor_c = self.outdoor.evaluate_at(now);

        // Explicit Euler over the interval since the last integration step.
        let gain = if self.heating { self.heat_rate_c_per_hour } else { 0.0 };
        self.room_c += dt_hours * (gain - self.loss_rate_per_hour * (self.room_c - outdoor_c));
        if self.heating {
            self.energy_wh += self.max_power_w * dt_hours;
        }

        self.decide_heating();
        trace!(
            heater = %self.core.uri(),
            room_c = self.room_c,
            outdoor_c,
            heating = self.heating,
            "heater step"
        );
        self.room.set_new_value(self.room_c, now);
        self.power
            .set_new_value(if self.heating { self.max_power_w } else { 0.0 }, now);
        self.last_sample = now;
        self.next_sample = now.add(self.step);
    }

    fn external_transition(&mut self, elapsed: Duration) {
        self.core.advance_time(elapsed);
        for event in self.core.take_stored_events() {
            event.execute_on(self);
        }
        self.decide_heating();
        let now = self.core.current_time();
        self.power
            .set_new_value(if self.heating { self.max_power_w } else { 0.0 }, now);
    }

    fn fixpoint_initialise_variables(&mut self) -> FixpointStatus {
        if self.published {
            return FixpointStatus::settled();
        }
        if !self.outdoor.is_bound() || !self.outdoor.is_source_initialised() {
            return FixpointStatus {
                just_initialised: 0,
                still_blocked: 2,
            };
        }
        let now = self.core.current_time();
        self.decide_heating();
        self.room.initialise(self.room_c, now);
        self.power
            .initialise(if self.heating { self.max_power_w } else { 0.0 }, now);
        self.published = true;
        FixpointStatus {
            just_initialised: 2,
            still_blocked: 0,
        }
    }

    fn variable_registry_mut(&mut self) -> Option<&mut VariableRegistry> {
        Some(&mut self.registry)
    }

    fn set_run_parameters(&mut self, params: &RunParameters) -> Result<(), RunParameterError> {
        let Some(overrides) = params.for_model(self.core.uri()) else {
            return Ok(());
        };
        for (name, &value) in overrides {
            match name.as_str() {
                "setpoint_c" if !(5.0..=30.0).contains(&value) => {
                    return Err(RunParameterError::Invalid {
                        uri: self.core.uri().to_string(),
                        name: name.clone(),
                        value,
                        constraint: "setpoint must lie in 5..=30 °C".into(),
                    });
                }
                "setpoint_c" => self.setpoint_c = value,
                "max_power_w" if value <= 0.0 => {
                    return Err(RunParameterError::Invalid {
                        uri: self.core.uri().to_string(),
                        name: name.clone(),
                        value,
                        constraint: "power must be > 0".into(),
                    });
                }
                "max_power_w" => self.max_power_w = value,
                "initial_room_c" => {
                    self.initial_room_c = value;
                    self.room_c = value;
                }
                _ => {
                    return Err(RunParameterError::Unknown {
                        uri: self.core.uri().to_string(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn end_simulation(&mut self, end_time: Time) {
        self.room.set_new_value(self.room_c, end_time);
    }

    fn final_report(&self) -> SimulationReport {
        SimulationReport::leaf(
            self.core.uri(),
            format!(
                "room {:.1} °C at end, {:.2} kWh heating",
                self.room_c,
                self.energy_wh / 1000.0
            ),
        )
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Scripted controller issuing heater overrides at fixed offsets from the
/// run start. Stands in for a remote operator in distributed runs.
pub struct HeaterProgramModel {
    core: AtomicModelCore,
    /// (offset from start, force heating on), ascending by offset.
    program: Vec<(f64, bool)>,
    next: usize,
    start: Time,
}

impl HeaterProgramModel {
    /// Creates a controller with the given override program.
    ///
    /// # Panics
    ///
    /// Panics if the offsets are not ascending or any offset is negative.
    pub fn new(uri: impl Into<String>, unit: TimeUnit, program: Vec<(f64, bool)>) -> Self {
        assert!(
            program.windows(2).all(|w| w[0].0 <= w[1].0),
            "heater program must be ascending"
        );
        assert!(
            program.iter().all(|(offset, _)| *offset >= 0.0),
            "heater program offsets must be >= 0"
        );
        Self {
            core: AtomicModelCore::new(uri, unit),
            program,
            next: 0,
            start: Time::zero(unit),
        }
    }

    fn next_at(&self) -> Option<Time> {
        self.program
            .get(self.next)
            .map(|(offset, _)| self.start.add(Duration::new(*offset, self.time_unit())))
    }
}

impl AtomicModelI for HeaterProgramModel {
    fn core(&self) -> &AtomicModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AtomicModelCore {
        &mut self.core
    }

    fn initialise_state(&mut self, initial_time: Time) {
        self.core.initialise(initial_time);
        self.start = initial_time;
        self.next = 0;
    }

    fn time_advance(&self) -> Duration {
        match self.next_at() {
            Some(at) => at.sub(self.core.current_time()),
            None => Duration::infinity(self.time_unit()),
        }
    }

    fn output(&mut self) -> Vec<Box<dyn EventI>> {
        let (_, heat) = self.program[self.next];
        let at = self.next_at().expect("output called with empty program");
        let event = if heat {
            HeaterCommandEvent::heat(at)
        } else {
            HeaterCommandEvent::do_not_heat(at)
        };
        vec![Box::new(event)]
    }

    fn internal_transition(&mut self, elapsed: Duration) {
        self.core.advance_time(elapsed);
        self.next += 1;
    }

    fn external_transition(&mut self, elapsed: Duration) {
        // A controller takes no input; drain the batch to honor the buffer
        // contract.
        self.core.advance_time(elapsed);
        let _ = self.core.take_stored_events();
    }

    fn end_simulation(&mut self, _end_time: Time) {}

    fn final_report(&self) -> SimulationReport {
        SimulationReport::leaf(
            self.core.uri(),
            format!("{} of {} overrides issued", self.next, self.program.len()),
        )
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
