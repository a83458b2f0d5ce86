//! Household energy-management simulator built on a hybrid discrete-event
//! kernel.

pub mod architecture;
pub mod config;
/// Simulation engines: atomic, coordinator, real-time pacing, and the run
/// facade.
pub mod engine;
pub mod event;
pub mod household;
pub mod model;
pub mod plugin;
pub mod runner;
pub mod telemetry;
pub mod time;
pub mod variable;
