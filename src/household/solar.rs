//! Solar panel: a noisy daylight production curve published as a variable.

use std::any::Any;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::engine::SimulationReport;
use crate::event::EventI;
use crate::household::{gaussian_noise, hours_per_unit};
use crate::model::{AtomicModelCore, AtomicModelI, FixpointStatus, RunParameterError, RunParameters};
use crate::time::{Duration, Time, TimeUnit};
use crate::variable::{StepInterpolator, ValueHistory, Variable, VariableHandle, VariableRegistry};

pub const PRODUCTION: &str = "production";

/// Publishes `production` in watts: a half-sine between sunrise and sunset
/// scaled by seeded multiplicative noise, zero at night.
pub struct SolarPanelModel {
    core: AtomicModelCore,
    step: Duration,
    peak_w: f64,
    sunrise_hour: f64,
    sunset_hour: f64,
    noise_std: f64,
    rng: StdRng,
    seed: u64,
    production: VariableHandle<f64>,
    registry: VariableRegistry,
    published: bool,
    energy_wh: f64,
}

impl SolarPanelModel {
    /// Creates the panel. Noise is reproducible per `seed`.
    ///
    /// # Panics
    ///
    /// Panics if `step` is zero or infinite, `peak_w` is negative, or the
    /// daylight window is not within `0 <= sunrise < sunset <= 24`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uri: impl Into<String>,
        unit: TimeUnit,
        step: Duration,
        history_window: Duration,
        peak_w: f64,
        sunrise_hour: f64,
        sunset_hour: f64,
        noise_std: f64,
        seed: u64,
    ) -> Self {
        let uri = uri.into();
        assert!(
            step.value() > 0.0 && !step.is_infinite(),
            "solar model {uri}: step must be positive and finite"
        );
        assert!(peak_w >= 0.0, "solar model {uri}: peak power must be >= 0");
        assert!(
            0.0 <= sunrise_hour && sunrise_hour < sunset_hour && sunset_hour <= 24.0,
            "solar model {uri}: daylight window must satisfy 0 <= sunrise < sunset <= 24"
        );

        let production = VariableHandle::new(
            Variable::new(PRODUCTION, uri.clone(), unit)
                .with_history(ValueHistory::new(history_window, Box::new(StepInterpolator))),
        );
        let mut registry = VariableRegistry::new(uri.clone());
        registry.register_exported(PRODUCTION, &production);

        Self {
            core: AtomicModelCore::new(uri, unit),
            step,
            peak_w,
            sunrise_hour,
            sunset_hour,
            noise_std: noise_std.max(0.0),
            rng: StdRng::seed_from_u64(seed),
            seed,
            production,
            registry,
            published: false,
            energy_wh: 0.0,
        }
    }

    fn daylight_frac(&self, t: Time) -> f64 {
        let hour = (t.value() * hours_per_unit(self.time_unit())) % 24.0;
        if hour < self.sunrise_hour || hour >= self.sunset_hour {
            return 0.0;
        }
        let x = (hour - self.sunrise_hour) / (self.sunset_hour - self.sunrise_hour);
        (PI * x).sin()
    }

    fn production_at(&mut self, t: Time) -> f64 {
        let frac = self.daylight_frac(t);
        if frac <= 0.0 {
            return 0.0;
        }
        let noise_mult = 1.0 + gaussian_noise(&mut self.rng, self.noise_std);
        (self.peak_w * frac * noise_mult).max(0.0)
    }
}

impl AtomicModelI for SolarPanelModel {
    fn core(&self) -> &AtomicModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AtomicModelCore {
        &mut self.core
    }

    fn initialise_state(&mut self, initial_time: Time) {
        self.core.initialise(initial_time);
        self.production.reinitialise();
        self.published = false;
        self.energy_wh = 0.0;
        self.rng = StdRng::seed_from_u64(self.seed);
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
        let watts = self.production_at(now);
        self.energy_wh += watts * self.step.value() * hours_per_unit(self.time_unit());
        self.production.set_new_value(watts, now);
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
        let watts = self.production_at(now);
        self.production.initialise(watts, now);
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
                "peak_w" if value < 0.0 => {
                    return Err(RunParameterError::Invalid {
                        uri: self.core.uri().to_string(),
                        name: name.clone(),
                        value,
                        constraint: "peak power must be >= 0".into(),
                    });
                }
                "peak_w" => self.peak_w = value,
                "noise_std" => self.noise_std = value.max(0.0),
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

    fn end_simulation(&mut self, _end_time: Time) {}

    fn final_report(&self) -> SimulationReport {
        SimulationReport::leaf(
            self.core.uri(),
            format!("{:.2} kWh produced", self.energy_wh / 1000.0),
        )
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(noise_std: f64) -> SolarPanelModel {
        let mut panel = SolarPanelModel::new(
            "house.solar",
            TimeUnit::Hours,
            Duration::new(1.0, TimeUnit::Hours),
            Duration::new(24.0, TimeUnit::Hours),
            4000.0,
            6.0,
            18.0,
            noise_std,
            42,
        );
        panel.initialise_state(Time::zero(TimeUnit::Hours));
        panel
    }

    #[test]
    fn no_production_at_night() {
        let mut panel = panel(0.0);
        assert_eq!(panel.production_at(Time::new(3.0, TimeUnit::Hours)), 0.0);
        assert_eq!(panel.production_at(Time::new(22.0, TimeUnit::Hours)), 0.0);
    }

    #[test]
    fn peak_production_at_solar_noon() {
        let mut panel = panel(0.0);
        let noon = panel.production_at(Time::new(12.0, TimeUnit::Hours));
        assert!((noon - 4000.0).abs() < 1e-6);
    }

    #[test]
    fn production_is_deterministic_per_seed() {
        let mut a = panel(0.1);
        let mut b = panel(0.1);
        for hour in 0..24 {
            let t = Time::new(hour as f64, TimeUnit::Hours);
            assert_eq!(a.production_at(t), b.production_at(t));
        }
    }

    #[test]
    fn reinitialisation_resets_the_noise_stream() {
        let mut panel = panel(0.1);
        panel.fixpoint_initialise_variables();
        let first: Vec<f64> = (0..24)
            .map(|_| {
                panel.internal_transition(Duration::new(1.0, TimeUnit::Hours));
                panel.production.value()
            })
            .collect();

        panel.initialise_state(Time::zero(TimeUnit::Hours));
        panel.fixpoint_initialise_variables();
        let second: Vec<f64> = (0..24)
            .map(|_| {
                panel.internal_transition(Duration::new(1.0, TimeUnit::Hours));
                panel.production.value()
            })
            .collect();
        assert_eq!(first, second);
    }
}
