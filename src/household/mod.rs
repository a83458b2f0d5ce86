//! Household appliance models exercising the simulation kernel.
//!
//! Deliberately thin state machines: a lamp driven by user events, a heater
//! with a hysteresis thermostat and an Euler temperature update, a solar
//! panel with a noisy daylight curve, an outdoor temperature source, and the
//! electric meter aggregating everything. The physics stays simple; the point
//! is the event, variable, and composition plumbing around it.

pub mod heater;
pub mod lamp;
pub mod meter;
pub mod outdoor;
pub mod solar;

pub use heater::{HeaterModel, HeaterProgramModel};
pub use lamp::{LampModel, LampUserModel};
pub use meter::ElectricMeterModel;
pub use outdoor::OutdoorModel;
pub use solar::SolarPanelModel;

use rand::rngs::StdRng;
use rand::Rng;

use crate::time::TimeUnit;

/// Hours of simulated time per unit of `unit`.
pub(crate) fn hours_per_unit(unit: TimeUnit) -> f64 {
    unit.nanos_per_unit() / 3_600.0e9
}

/// Zero-mean Gaussian sample with the given standard deviation, via
/// Box-Muller.
pub(crate) fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn hours_per_unit_matches_definitions() {
        assert_eq!(hours_per_unit(TimeUnit::Hours), 1.0);
        assert_eq!(hours_per_unit(TimeUnit::Minutes), 1.0 / 60.0);
        assert_eq!(hours_per_unit(TimeUnit::Seconds), 1.0 / 3600.0);
    }

    #[test]
    fn noise_is_deterministic_per_seed_and_zero_for_zero_std() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        assert_eq!(gaussian_noise(&mut a, 0.1), gaussian_noise(&mut b, 0.1));
        assert_eq!(gaussian_noise(&mut a, 0.0), 0.0);
    }
}
