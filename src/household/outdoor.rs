//! Outdoor temperature source: a sinusoidal daily curve.

use std::any::Any;
use std::f64::consts::TAU;

use crate::engine::SimulationReport;
use crate::event::EventI;
use crate::household::hours_per_unit;
use crate::model::{AtomicModelCore, AtomicModelI, FixpointStatus, RunParameterError, RunParameters};
use crate::time::{Duration, Time, TimeUnit};
use crate::variable::{LinearInterpolator, ValueHistory, Variable, VariableHandle, VariableRegistry};

pub const EXTERNAL_TEMPERATURE: &str = "external_temperature";

/// Publishes `external_temperature` in degrees Celsius, sampled every `step`,
/// following a 24-hour sinusoid with its minimum at the start of the day.
pub struct OutdoorModel {
    core: AtomicModelCore,
    step: Duration,
    mean_c: f64,
    amplitude_c: f64,
    temperature: VariableHandle<f64>,
    registry: VariableRegistry,
    published: bool,
}

impl OutdoorModel {
    /// Creates the source with samples linearly interpolated over a
    /// `history_window` of past values.
    ///
    /// # Panics
    ///
    /// Panics if `step` is zero or infinite, or `amplitude_c` is negative.
    pub fn new(
        uri: impl Into<String>,
        unit: TimeUnit,
        step: Duration,
        history_window: Duration,
        mean_c: f64,
        amplitude_c: f64,
    ) -> Self {
        let uri = uri.into();
        assert!(
            step.value() > 0.0 && !step.is_infinite(),
            "outdoor model {uri}: step must be positive and finite"
        );
        assert!(amplitude_c >= 0.0, "outdoor model {uri}: amplitude must be >= 0");

        let temperature = VariableHandle::new(
            Variable::new(EXTERNAL_TEMPERATURE, uri.clone(), unit)
                .with_history(ValueHistory::new(history_window, Box::new(LinearInterpolator))),
        );
        let mut registry = VariableRegistry::new(uri.clone());
        registry.register_exported(EXTERNAL_TEMPERATURE, &temperature);

        Self {
            core: AtomicModelCore::new(uri, unit),
            step,
            mean_c,
            amplitude_c,
            temperature,
            registry,
            published: false,
        }
    }

    /// Curve value at instant `t`: coldest at hour 0, warmest at hour 12.
    fn temperature_at(&self, t: Time) -> f64 {
        let hour_of_day = (t.value() * hours_per_unit(self.time_unit())) % 24.0;
        self.mean_c - self.amplitude_c * (TAU * hour_of_day / 24.0).cos()
    }
}

impl AtomicModelI for OutdoorModel {
    fn core(&self) -> &AtomicModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AtomicModelCore {
        &mut self.core
    }

    fn initialise_state(&mut self, initial_time: Time) {
        self.core.initialise(initial_time);
        self.temperature.reinitialise();
        self.published = false;
    }

    fn time_advance(&self) -> Duration {
        self.step
    }

    fn output(&mut self) -> Vec<Box<dyn EventI>> {
        Vec::new()
    }

    fn internal_transition(&mut self, elapsed: Duration) {
        self.core.advance_time(elapsed);
        let now = self.core.current_time();
        self.temperature.set_new_value(self.temperature_at(now), now);
    }

    fn external_transition(&mut self, elapsed: Duration) {
        self.core.advance_time(elapsed);
        let _ = self.core.take_stored_events();
    }

    fn fixpoint_initialise_variables(&mut self) -> FixpointStatus {
        if self.published {
            return FixpointStatus::settled();
        }
        let now = self.core.current_time();
        self.temperature.initialise(self.temperature_at(now), now);
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
                "mean_c" => self.mean_c = value,
                "amplitude_c" if value < 0.0 => {
                    return Err(RunParameterError::Invalid {
                        uri: self.core.uri().to_string(),
                        name: name.clone(),
                        value,
                        constraint: "amplitude must be >= 0".into(),
                    });
                }
                "amplitude_c" => self.amplitude_c = value,
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
        self.temperature
            .set_new_value(self.temperature_at(end_time), end_time);
    }

    fn final_report(&self) -> SimulationReport {
        SimulationReport::leaf(
            self.core.uri(),
            format!("{:.1} °C at end", self.temperature.value()),
        )
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outdoor() -> OutdoorModel {
        let mut model = OutdoorModel::new(
            "house.outdoor",
            TimeUnit::Hours,
            Duration::new(1.0, TimeUnit::Hours),
            Duration::new(24.0, TimeUnit::Hours),
            10.0,
            5.0,
        );
        model.initialise_state(Time::zero(TimeUnit::Hours));
        model
    }

    #[test]
    fn coldest_at_midnight_warmest_at_noon() {
        let model = outdoor();
        let midnight = model.temperature_at(Time::zero(TimeUnit::Hours));
        let noon = model.temperature_at(Time::new(12.0, TimeUnit::Hours));
        assert!((midnight - 5.0).abs() < 1e-9);
        assert!((noon - 15.0).abs() < 1e-9);
    }

    #[test]
    fn fixpoint_initialises_once() {
        let mut model = outdoor();
        let status = model.fixpoint_initialise_variables();
        assert_eq!(status.just_initialised, 1);
        assert_eq!(model.fixpoint_initialise_variables(), FixpointStatus::settled());
        assert!((model.temperature.value() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn internal_transitions_publish_monotonically() {
        let mut model = outdoor();
        model.fixpoint_initialise_variables();
        for _ in 0..6 {
            model.internal_transition(Duration::new(1.0, TimeUnit::Hours));
        }
        assert_eq!(
            model.temperature.time_of_last_value(),
            Time::new(6.0, TimeUnit::Hours)
        );
    }

    #[test]
    fn history_interpolates_between_samples() {
        let mut model = outdoor();
        model.fixpoint_initialise_variables();
        model.internal_transition(Duration::new(1.0, TimeUnit::Hours));
        model.internal_transition(Duration::new(1.0, TimeUnit::Hours));
        let t1 = model.temperature.evaluate_at(Time::new(1.0, TimeUnit::Hours));
        let t2 = model.temperature.evaluate_at(Time::new(2.0, TimeUnit::Hours));
        let mid = model.temperature.evaluate_at(Time::new(1.5, TimeUnit::Hours));
        assert!((mid - (t1 + t2) / 2.0).abs() < 1e-9);
    }
}
