//! Root driver for pure logical-time (stand-alone) simulation runs.

use tracing::{debug, info};

use crate::engine::{SimulationError, SimulatorI, report::SimulationReport};
use crate::event::EventI;
use crate::model::{RunParameterError, RunParameters};
use crate::time::{Time, TimeUnit};

/// A fully composed simulation: the root engine plus the run protocol.
///
/// Construct one from an
/// [`Architecture`](crate::architecture::Architecture) via
/// `construct_simulator`, then either drive it in logical time with
/// [`Simulation::do_stand_alone_simulation`] or hand it to an
/// [`RtEngine`](crate::engine::rt::RtEngine) for a wall-clock-paced run.
pub struct Simulation {
    root: Box<dyn SimulatorI>,
    time_unit: TimeUnit,
}

impl Simulation {
    /// Wraps the root engine of a composed model tree.
    pub fn new(root: Box<dyn SimulatorI>) -> Self {
        let time_unit = root.time_unit();
        Self { root, time_unit }
    }

    /// Simulated time unit of the whole run.
    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Initialises all models at `start` and runs the fixpoint variable
    /// initialisation to convergence.
    ///
    /// # Errors
    ///
    /// [`SimulationError::FixpointDeadlock`] when the variable-binding graph
    /// is cyclic or a source is missing; surfaced before the first
    /// `time_advance`.
    pub fn initialise(&mut self, start: Time) -> Result<(), SimulationError> {
        self.root.initialise_simulation(start);
        // An acyclic binding graph over N models converges in at most N rounds.
        let rounds = self.root.model_count() + 1;
        let mut blocked = 0;
        for round in 0..rounds {
            let status = self.root.fixpoint_initialise_variables();
            if status.still_blocked == 0 {
                debug!(rounds = round + 1, "fixpoint variable initialisation converged");
                return Ok(());
            }
            blocked = status.still_blocked;
            if status.just_initialised == 0 {
                return Err(SimulationError::FixpointDeadlock { blocked });
            }
        }
        Err(SimulationError::FixpointDeadlock { blocked })
    }

    /// Earliest instant at which any model in the tree has work.
    pub fn time_of_next_event(&self) -> Time {
        self.root.time_of_next_event()
    }

    /// Delivers an externally produced event (distributed runs) into the
    /// tree.
    pub fn store_external_event(&mut self, event: Box<dyn EventI>) {
        self.root.store_external_event(event);
    }

    /// Processes everything due at `t`: collects and routes outputs, then
    /// executes all due transitions. Returns the events the root exports
    /// beyond the tree boundary.
    pub fn step_at(&mut self, t: Time) -> Vec<Box<dyn EventI>> {
        let exported = self.root.collect_outputs(t);
        self.root.execute_transitions(t);
        exported
    }

    /// Runs the whole simulation in logical time over `[start, end]`.
    ///
    /// Events exported at the root have no sink in a stand-alone run and are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Fails on an empty window or a fixpoint initialisation deadlock.
    pub fn do_stand_alone_simulation(
        &mut self,
        start: Time,
        end: Time,
    ) -> Result<(), SimulationError> {
        if !start.is_before(end) {
            return Err(SimulationError::InvalidWindow { start, end });
        }
        info!(%start, %end, "stand-alone simulation starting");
        self.initialise(start)?;
        loop {
            let t = self.time_of_next_event();
            if t.is_infinite() || end.is_before(t) {
                break;
            }
            let exported = self.step_at(t);
            if !exported.is_empty() {
                debug!(
                    at = %t,
                    count = exported.len(),
                    "events exported at the simulation root, dropped"
                );
            }
        }
        self.root.end_simulation(end);
        info!(%end, "stand-alone simulation finished");
        Ok(())
    }

    /// Notifies every model that the run is over.
    pub fn end(&mut self, at: Time) {
        self.root.end_simulation(at);
    }

    /// Applies named numeric overrides to specific models before a run.
    ///
    /// # Errors
    ///
    /// [`RunParameterError::UnknownModel`] when an override targets a URI no
    /// composed model carries, and the models' own rejections otherwise.
    pub fn set_run_parameters(&mut self, params: &RunParameters) -> Result<(), RunParameterError> {
        for uri in params.model_uris() {
            if !self.root.contains_model(uri) {
                return Err(RunParameterError::UnknownModel { uri: uri.clone() });
            }
        }
        self.root.set_run_parameters(params)
    }

    /// Recursive, model-URI-keyed report of the finished run.
    pub fn final_report(&self) -> SimulationReport {
        self.root.final_report()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::engine::AtomicEngine;
    use crate::model::{AtomicModelCore, AtomicModelI, FixpointStatus};
    use crate::time::Duration;

    /// Reports fixpoint progress every round yet never settles.
    struct ChurningModel {
        core: AtomicModelCore,
    }

    impl ChurningModel {
        fn new() -> Self {
            Self {
                core: AtomicModelCore::new("churn", TimeUnit::Seconds),
            }
        }
    }

    impl AtomicModelI for ChurningModel {
        fn core(&self) -> &AtomicModelCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut AtomicModelCore {
            &mut self.core
        }

        fn initialise_state(&mut self, initial_time: Time) {
            self.core.initialise(initial_time);
        }

        fn time_advance(&self) -> Duration {
            Duration::infinity(TimeUnit::Seconds)
        }

        fn output(&mut self) -> Vec<Box<dyn EventI>> {
            Vec::new()
        }

        fn internal_transition(&mut self, elapsed: Duration) {
            self.core.advance_time(elapsed);
        }

        fn external_transition(&mut self, elapsed: Duration) {
            self.core.advance_time(elapsed);
            let _ = self.core.take_stored_events();
        }

        fn fixpoint_initialise_variables(&mut self) -> FixpointStatus {
            FixpointStatus {
                just_initialised: 1,
                still_blocked: 3,
            }
        }

        fn end_simulation(&mut self, _end_time: Time) {}

        fn final_report(&self) -> SimulationReport {
            SimulationReport::leaf(self.core.uri(), "never settles")
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn simulation() -> Simulation {
        let engine = AtomicEngine::new(Box::new(ChurningModel::new()));
        Simulation::new(Box::new(engine))
    }

    #[test]
    fn exhausted_fixpoint_rounds_report_the_final_blocked_count() {
        let mut simulation = simulation();
        let result = simulation.initialise(Time::zero(TimeUnit::Seconds));
        assert!(
            matches!(result, Err(SimulationError::FixpointDeadlock { blocked: 3 })),
            "got {result:?}"
        );
    }

    #[test]
    fn overrides_for_an_unknown_model_are_rejected() {
        let mut simulation = simulation();
        let mut params = RunParameters::default();
        params.set("house.heter", "setpoint_c", 22.0);
        assert!(matches!(
            simulation.set_run_parameters(&params),
            Err(RunParameterError::UnknownModel { uri }) if uri == "house.heter"
        ));
    }
}
