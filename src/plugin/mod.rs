//! Distributed execution: component plugins behind narrow port interfaces.
//!
//! A distributed run splits one architecture across components. Each
//! component hosts a [`SimulatorPluginI`] driving its local subtree in real
//! time; a [`CoordinatorPlugin`](coordinator::CoordinatorPlugin) routes
//! events between components; a
//! [`SupervisorPlugin`](supervisor::SupervisorPlugin) drives the shared
//! lifecycle. Components talk only through the two port traits, so an
//! in-process [`LocalPort`] and a future network transport are
//! interchangeable.

pub mod component;
pub mod coordinator;
pub mod supervisor;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::architecture::ArchitectureError;
use crate::engine::{SimulationError, SimulationReport};
use crate::event::EventI;
use crate::model::RunParameters;
use crate::time::{Duration, Time};

pub use component::AtomicSimulatorPlugin;
pub use coordinator::{CoordinatorPlugin, InterComponentRoute};
pub use supervisor::SupervisorPlugin;

/// A failure inside a component or on a port.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("component {uri}: {operation} is illegal while {state}")]
    InvalidState {
        uri: String,
        operation: &'static str,
        state: &'static str,
    },
    #[error("component {uri}: architecture rejected with {} defect(s), first: {}", errors.len(), errors[0])]
    Architecture {
        uri: String,
        errors: Vec<ArchitectureError>,
    },
    #[error("component {uri}: no simulation running to receive events")]
    NotRunning { uri: String },
    #[error("component {uri}: simulation worker disappeared")]
    Disconnected { uri: String },
    #[error("component {uri}: simulation worker panicked")]
    WorkerPanicked { uri: String },
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    RunParameter(#[from] crate::model::RunParameterError),
}

/// Lifecycle interface of one distributed component.
///
/// Operations follow a strict order: construct, set run parameters
/// (optional), start, wait, report. Calls out of order fail with
/// [`PluginError::InvalidState`].
pub trait SimulatorPluginI: Send {
    /// URI of the component's root model.
    fn uri(&self) -> &str;

    /// Validates the local architecture and composes the local simulator.
    fn construct_simulator(&mut self) -> Result<(), PluginError>;

    /// Stages run-specific overrides on the composed models.
    fn set_run_parameters(&mut self, params: &RunParameters) -> Result<(), PluginError>;

    /// Starts the local real-time run at the shared wall-clock instant
    /// `epoch_start_millis` (Unix epoch milliseconds). All components of one
    /// distributed run receive the same instant, which serves as the start
    /// barrier.
    fn start_simulation(
        &mut self,
        epoch_start_millis: u64,
        sim_start: Time,
        duration: Duration,
    ) -> Result<(), PluginError>;

    /// Injects an event emitted by another component into the local subtree.
    fn deliver_event(&mut self, source: &str, event: Box<dyn EventI>) -> Result<(), PluginError>;

    /// Non-blocking completion check. Returns `Ok(true)` once the local run
    /// has finished, surfacing any run failure at that point.
    fn poll_completion(&mut self) -> Result<bool, PluginError>;

    /// Blocks until the local run finishes, surfacing any run failure.
    fn wait_for_completion(&mut self) -> Result<(), PluginError> {
        while !self.poll_completion()? {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        Ok(())
    }

    /// Final report of the completed local run.
    fn final_report(&mut self) -> Result<SimulationReport, PluginError>;
}

/// Management face of a component as seen by the supervisor.
pub trait SimulationManagementPortI: Send + Sync {
    fn uri(&self) -> String;
    fn construct_simulator(&self) -> Result<(), PluginError>;
    fn set_run_parameters(&self, params: &RunParameters) -> Result<(), PluginError>;
    fn start_simulation(
        &self,
        epoch_start_millis: u64,
        sim_start: Time,
        duration: Duration,
    ) -> Result<(), PluginError>;
    fn wait_for_completion(&self) -> Result<(), PluginError>;
    fn final_report(&self) -> Result<SimulationReport, PluginError>;
}

/// Event face of a component as seen by its peers.
pub trait EventExchangePortI: Send + Sync {
    /// Delivers an event emitted by the component rooted at `source`.
    fn deliver_event(&self, source: &str, event: Box<dyn EventI>) -> Result<(), PluginError>;
}

/// In-process port: both faces of a plugin behind a shared mutex.
pub struct LocalPort<P> {
    target: Arc<Mutex<P>>,
}

impl<P> LocalPort<P> {
    pub fn new(target: Arc<Mutex<P>>) -> Self {
        Self { target }
    }
}

impl<P> Clone for LocalPort<P> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
        }
    }
}

impl<P: SimulatorPluginI> LocalPort<P> {
    fn locked(&self) -> std::sync::MutexGuard<'_, P> {
        self.target.lock().expect("plugin lock poisoned")
    }
}

impl<P: SimulatorPluginI> SimulationManagementPortI for LocalPort<P> {
    fn uri(&self) -> String {
        self.locked().uri().to_string()
    }

    fn construct_simulator(&self) -> Result<(), PluginError> {
        self.locked().construct_simulator()
    }

    fn set_run_parameters(&self, params: &RunParameters) -> Result<(), PluginError> {
        self.locked().set_run_parameters(params)
    }

    fn start_simulation(
        &self,
        epoch_start_millis: u64,
        sim_start: Time,
        duration: Duration,
    ) -> Result<(), PluginError> {
        self.locked()
            .start_simulation(epoch_start_millis, sim_start, duration)
    }

    fn wait_for_completion(&self) -> Result<(), PluginError> {
        // Poll with short lock holds: a long-held lock would starve peers
        // still delivering events to this component mid-run.
        loop {
            if self.locked().poll_completion()? {
                return Ok(());
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn final_report(&self) -> Result<SimulationReport, PluginError> {
        self.locked().final_report()
    }
}

impl<P: SimulatorPluginI> EventExchangePortI for LocalPort<P> {
    fn deliver_event(&self, source: &str, event: Box<dyn EventI>) -> Result<(), PluginError> {
        self.locked().deliver_event(source, event)
    }
}
