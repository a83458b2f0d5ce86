//! Electric meter: aggregates consumption and production, feeds telemetry.

use std::any::Any;

use tracing::trace;

use crate::engine::SimulationReport;
use crate::event::EventI;
use crate::household::hours_per_unit;
use crate::model::{AtomicModelCore, AtomicModelI, FixpointStatus, RunParameterError, RunParameters};
use crate::telemetry::{MeterRow, TelemetryLog};
use crate::time::{Duration, Time, TimeUnit};
use crate::variable::{
    ImportedVariable, StepInterpolator, ValueHistory, Variable, VariableHandle, VariableRegistry,
};

pub const TOTAL_CONSUMPTION: &str = "total_consumption";
/// Import slot names for the aggregated sources.
pub const PRODUCTION_IN: &str = "production";
pub const HEATER_POWER_IN: &str = "heater_power";

/// Samples the household power balance every `step`, publishes
/// `total_consumption`, and appends one telemetry row per sample.
///
/// Consumption is the constant base load plus the lamp draw (updated by
/// `lamp_power` events) plus the heater draw (read from a bound variable);
/// production is read from the solar panel's bound variable.
pub struct ElectricMeterModel {
    core: AtomicModelCore,
    step: Duration,
    base_load_w: f64,
    lamp_load_w: f64,
    production: ImportedVariable<f64>,
    heater_power: ImportedVariable<f64>,
    total: VariableHandle<f64>,
    registry: VariableRegistry,
    last_sample: Time,
    next_sample: Time,
    published: bool,
    energy_consumed_wh: f64,
    energy_produced_wh: f64,
    log: TelemetryLog,
}

impl ElectricMeterModel {
    /// Creates the meter; sampled rows go to `log`.
    ///
    /// # Panics
    ///
    /// Panics if `step` is zero or infinite, or `base_load_w` is negative.
    pub fn new(
        uri: impl Into<String>,
        unit: TimeUnit,
        step: Duration,
        history_window: Duration,
        base_load_w: f64,
        log: TelemetryLog,
    ) -> Self {
        let uri = uri.into();
        assert!(
            step.value() > 0.0 && !step.is_infinite(),
            "meter model {uri}: step must be positive and finite"
        );
        assert!(base_load_w >= 0.0, "meter model {uri}: base load must be >= 0");

        let total = VariableHandle::new(
            Variable::new(TOTAL_CONSUMPTION, uri.clone(), unit)
                .with_history(ValueHistory::new(history_window, Box::new(StepInterpolator))),
        );
        let production = ImportedVariable::new(PRODUCTION_IN);
        let heater_power = ImportedVariable::new(HEATER_POWER_IN);
        let mut registry = VariableRegistry::new(uri.clone());
        registry.register_exported(TOTAL_CONSUMPTION, &total);
        registry.register_imported(PRODUCTION_IN, &production);
        registry.register_imported(HEATER_POWER_IN, &heater_power);

        Self {
            core: AtomicModelCore::new(uri, unit),
            step,
            base_load_w,
            lamp_load_w: 0.0,
            production,
            heater_power,
            total,
            registry,
            last_sample: Time::zero(unit),
            next_sample: Time::zero(unit),
            published: false,
            energy_consumed_wh: 0.0,
            energy_produced_wh: 0.0,
            log,
        }
    }

    /// Records the lamp's announced draw; used by `lamp_power` events.
    pub fn set_lamp_load(&mut self, watts: f64) {
        self.lamp_load_w = watts.max(0.0);
    }

    fn sources_ready(&self) -> bool {
        self.production.is_bound()
            && self.production.is_source_initialised()
            && self.heater_power.is_bound()
            && self.heater_power.is_source_initialised()
    }

    fn consumption_at(&self, t: Time) -> f64 {
        self.base_load_w + self.lamp_load_w + self.heater_power.evaluate_at(t)
    }

    fn sample(&mut self, t: Time, dt_hours: f64) {
        let consumption_w = self.consumption_at(t);
        let production_w = self.production.evaluate_at(t);
        self.energy_consumed_wh += consumption_w * dt_hours;
        self.energy_produced_wh += production_w * dt_hours;
        self.total.set_new_value(consumption_w, t);

        let row = MeterRow {
            time: t.value(),
            consumption_w,
            production_w,
            net_w: consumption_w - production_w,
            energy_consumed_wh: self.energy_consumed_wh,
        };
        trace!(meter = %self.core.uri(), time = %t, consumption_w, production_w, "meter sample");
        self.log.lock().expect("telemetry lock poisoned").push(row);
    }
}

impl AtomicModelI for ElectricMeterModel {
    fn core(&self) -> &AtomicModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AtomicModelCore {
        &mut self.core
    }

    fn initialise_state(&mut self, initial_time: Time) {
        self.core.initialise(initial_time);
        self.total.reinitialise();
        self.lamp_load_w = 0.0;
        self.last_sample = initial_time;
        self.next_sample = initial_time.add(self.step);
        self.published = false;
        self.energy_consumed_wh = 0.0;
        self.energy_produced_wh = 0.0;
        self.log.lock().expect("telemetry lock poisoned").clear();
    }

    fn time_advance(&self) -> Duration {
        // Remainder to the fixed sampling grid; an off-grid lamp event must
        // neither shift the grid nor shorten the accrual interval.
        self.next_sample.sub(self.core.current_time())
    }

    fn output(&mut self) -> Vec<Box<dyn EventI>> {
        Vec::new()
    }

    fn internal_transition(&mut self, elapsed: Duration) {
        self.core.advance_time(elapsed);
        let now = self.core.current_time();
        let dt_hours = now.sub(self.last_sample).value() * hours_per_unit(self.time_unit());
        self.sample(now, dt_hours);
        self.last_sample = now;
        self.next_sample = now.add(self.step);
    }

    fn external_transition(&mut self, elapsed: Duration) {
        self.core.advance_time(elapsed);
        for event in self.core.take_stored_events() {
            event.execute_on(self);
        }
    }

    fn fixpoint_initialise_variables(&mut self) -> FixpointStatus {
        if self.published {
            return FixpointStatus::settled();
        }
        if !self.sources_ready() {
            return FixpointStatus {
                just_initialised: 0,
                still_blocked: 1,
            };
        }
        let now = self.core.current_time();
        self.total.initialise(self.consumption_at(now), now);
        self.published = true;
        FixpointStatus {
            just_initialised: 1,
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
                "base_load_w" if value < 0.0 => {
                    return Err(RunParameterError::Invalid {
                        uri: self.core.uri().to_string(),
                        name: name.clone(),
                        value,
                        constraint: "base load must be >= 0".into(),
                    });
                }
                "base_load_w" => self.base_load_w = value,
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
        // Final sample without energy accrual; the last full step already
        // counted it.
        if self.published {
            let consumption_w = self.consumption_at(end_time);
            self.total.set_new_value(consumption_w, end_time);
        }
    }

    fn final_report(&self) -> SimulationReport {
        SimulationReport::leaf(
            self.core.uri(),
            format!(
                "{:.2} kWh consumed, {:.2} kWh produced, net {:.2} kWh",
                self.energy_consumed_wh / 1000.0,
                self.energy_produced_wh / 1000.0,
                (self.energy_consumed_wh - self.energy_produced_wh) / 1000.0
            ),
        )
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
