//! Simulation engines: the DEVS transition loop for atomic models, the
//! coordinator protocol for coupled models, and the stand-alone and
//! real-time drivers.

pub mod atomic;
pub mod coordinator;
pub mod report;
pub mod rt;
pub mod simulation;

use thiserror::Error;

use crate::event::EventI;
use crate::model::{FixpointStatus, RunParameterError, RunParameters};
use crate::time::{Time, TimeUnit};
use crate::variable::VariableRegistry;

pub use atomic::AtomicEngine;
pub use coordinator::{CoordinatorEngine, RoutingTable};
pub use report::SimulationReport;
pub use rt::{NoClock, RtEngine, SimClock, SyncStatus, SystemClock};
pub use simulation::Simulation;

/// Fatal simulation-run error, raised before or while driving the engines.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The variable-binding graph could not be topologically resolved:
    /// a cycle or a missing source keeps models blocked.
    #[error("fixpoint variable initialisation deadlocked with {blocked} variables still blocked")]
    FixpointDeadlock {
        /// Variables still uninitialised when the fixpoint stalled.
        blocked: usize,
    },
    /// The acceleration factor must be strictly positive.
    #[error("invalid acceleration factor {value}; must be > 0")]
    InvalidAcceleration {
        /// Offending factor.
        value: f64,
    },
    /// The start of the simulated window does not precede its end.
    #[error("invalid simulation window: start {start} does not precede end {end}")]
    InvalidWindow {
        /// Requested start instant.
        start: Time,
        /// Requested end instant.
        end: Time,
    },
    /// A real-time run needs a finite wall-clock extent.
    #[error("real-time runs require a finite simulated duration")]
    InfiniteRtDuration,
}

/// Handle on a simulation engine subtree: one atomic engine or a coordinator
/// fanning out to child engines.
///
/// The engine tree owns the model tree; control flows top-down (time-advance
/// queries, transition triggers) and events flow bottom-up (outputs routed by
/// coordinators, reexports returned to the parent).
pub trait SimulatorI: Send {
    /// URI of the model this engine drives.
    fn uri(&self) -> &str;

    /// Simulated time unit of this subtree.
    fn time_unit(&self) -> TimeUnit;

    /// Resets the subtree for a run starting at `start`.
    fn initialise_simulation(&mut self, start: Time);

    /// Number of atomic models in this subtree (bounds the fixpoint rounds).
    fn model_count(&self) -> usize;

    /// `true` when an atomic model with `uri` lives in this subtree.
    fn contains_model(&self, uri: &str) -> bool;

    /// Runs one fixpoint round over the subtree's HIOA models.
    fn fixpoint_initialise_variables(&mut self) -> FixpointStatus;

    /// Variable registry of the atomic model at `uri`, if present in this
    /// subtree; used by the composer to wire bindings.
    fn variable_registry_of(&mut self, uri: &str) -> Option<&mut VariableRegistry>;

    /// Earliest instant at which this subtree has work: its next internal
    /// transition or earliest buffered external event.
    fn time_of_next_event(&self) -> Time;

    /// Collects the outputs of submodels imminent at `t`, routes them inside
    /// the subtree, and returns the events this subtree exports to its
    /// parent.
    fn collect_outputs(&mut self, t: Time) -> Vec<Box<dyn EventI>>;

    /// Delivers an event imported from the parent into this subtree.
    fn store_external_event(&mut self, event: Box<dyn EventI>);

    /// Executes all internal/external/confluent transitions due at `t`.
    fn execute_transitions(&mut self, t: Time);

    /// Applies per-instance run-parameter overrides across the subtree.
    fn set_run_parameters(&mut self, params: &RunParameters) -> Result<(), RunParameterError>;

    /// Notifies every model that the run reached `end`.
    fn end_simulation(&mut self, end: Time);

    /// Recursive final report of this subtree.
    fn final_report(&self) -> SimulationReport;
}
