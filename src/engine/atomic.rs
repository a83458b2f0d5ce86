//! The DEVS transition loop for one atomic model.

use tracing::trace;

use crate::engine::{SimulatorI, report::SimulationReport};
use crate::event::EventI;
use crate::model::{AtomicModelI, FixpointStatus, RunParameterError, RunParameters};
use crate::time::{Time, TimeUnit};
use crate::variable::VariableRegistry;

/// Engine driving one atomic model.
///
/// Tracks the time of the model's last transition and of its next scheduled
/// internal transition, buffers incoming events, and dispatches internal,
/// external, or confluent transitions when the coordinator advances the
/// clock.
pub struct AtomicEngine {
    model: Box<dyn AtomicModelI>,
    time_of_last: Time,
    time_of_next: Time,
    pending: Vec<Box<dyn EventI>>,
}

impl AtomicEngine {
    /// Wraps `model` in its simulation engine.
    pub fn new(model: Box<dyn AtomicModelI>) -> Self {
        let unit = model.time_unit();
        Self {
            model,
            time_of_last: Time::zero(unit),
            time_of_next: Time::infinity(unit),
            pending: Vec::new(),
        }
    }

    fn reschedule(&mut self, from: Time) {
        self.time_of_last = from;
        self.time_of_next = from.add(self.model.time_advance());
    }

    fn earliest_pending(&self) -> Time {
        self.pending
            .iter()
            .map(|e| e.time_of_occurrence())
            .fold(Time::infinity(self.model.time_unit()), Time::min)
    }
}

impl SimulatorI for AtomicEngine {
    fn uri(&self) -> &str {
        self.model.uri()
    }

    fn time_unit(&self) -> TimeUnit {
        self.model.time_unit()
    }

    fn initialise_simulation(&mut self, start: Time) {
        self.pending.clear();
        self.model.initialise_state(start);
        self.reschedule(start);
        trace!(
            uri = self.model.uri(),
            next = %self.time_of_next,
            "atomic engine initialised"
        );
    }

    fn model_count(&self) -> usize {
        1
    }

    fn contains_model(&self, uri: &str) -> bool {
        self.model.uri() == uri
    }

    fn fixpoint_initialise_variables(&mut self) -> FixpointStatus {
        self.model.fixpoint_initialise_variables()
    }

    fn variable_registry_of(&mut self, uri: &str) -> Option<&mut VariableRegistry> {
        if self.model.uri() == uri {
            self.model.variable_registry_mut()
        } else {
            None
        }
    }

    fn time_of_next_event(&self) -> Time {
        // A remote event can arrive stamped before the last transition when
        // a peer component lags behind the wall clock. It is executed at the
        // model's current logical time; the local clock never rewinds.
        let next = self.time_of_next.min(self.earliest_pending());
        if next.is_before(self.time_of_last) {
            self.time_of_last
        } else {
            next
        }
    }

    fn collect_outputs(&mut self, t: Time) -> Vec<Box<dyn EventI>> {
        if self.time_of_next.is_infinite() || t != self.time_of_next {
            return Vec::new();
        }
        let events = self.model.output();
        trace!(uri = self.model.uri(), at = %t, count = events.len(), "output collected");
        events
    }

    fn store_external_event(&mut self, event: Box<dyn EventI>) {
        self.pending.push(event);
    }

    fn execute_transitions(&mut self, t: Time) {
        // Same clamp as `time_of_next_event`: a sibling's late remote event
        // may drag the coordinator's step instant behind this engine's clock.
        let t = if t.is_before(self.time_of_last) {
            self.time_of_last
        } else {
            t
        };
        let imminent = !self.time_of_next.is_infinite() && t == self.time_of_next;
        let mut due = Vec::new();
        let mut later = Vec::new();
        for event in self.pending.drain(..) {
            if event.time_of_occurrence().is_before_or_equal(t) {
                due.push(event);
            } else {
                later.push(event);
            }
        }
        self.pending = later;

        if !imminent && due.is_empty() {
            return;
        }
        let elapsed = t.sub(self.time_of_last);
        for event in due.drain(..) {
            self.model.core_mut().store_input_event(event);
        }
        let has_input = self.model.core().has_stored_events();
        match (imminent, has_input) {
            (true, true) => {
                trace!(uri = self.model.uri(), at = %t, "confluent transition");
                self.model.confluent_transition(elapsed);
            }
            (true, false) => {
                trace!(uri = self.model.uri(), at = %t, "internal transition");
                self.model.internal_transition(elapsed);
            }
            (false, _) => {
                trace!(uri = self.model.uri(), at = %t, "external transition");
                self.model.external_transition(elapsed);
            }
        }
        self.reschedule(t);
    }

    fn set_run_parameters(&mut self, params: &RunParameters) -> Result<(), RunParameterError> {
        self.model.set_run_parameters(params)
    }

    fn end_simulation(&mut self, end: Time) {
        self.model.end_simulation(end);
    }

    fn final_report(&self) -> SimulationReport {
        self.model.final_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::household::lamp::{LampCommand, LampModel, SwitchEvent};

    fn minutes(v: f64) -> Time {
        Time::new(v, TimeUnit::Minutes)
    }

    fn lamp_engine() -> AtomicEngine {
        let lamp = LampModel::new("house.lamp", TimeUnit::Minutes, 20.0, 60.0);
        let mut engine = AtomicEngine::new(Box::new(lamp));
        engine.initialise_simulation(minutes(0.0));
        engine
    }

    #[test]
    fn late_event_executes_at_the_current_logical_time() {
        let mut engine = lamp_engine();
        engine.store_external_event(Box::new(SwitchEvent::new(
            LampCommand::SwitchOn,
            minutes(5.0),
        )));
        engine.execute_transitions(minutes(5.0));
        let _ = engine.collect_outputs(minutes(5.0));
        engine.execute_transitions(minutes(5.0));

        // Stamped before the last transition, as a lagging peer component
        // would send it.
        engine.store_external_event(Box::new(SwitchEvent::new(
            LampCommand::SetHigh,
            minutes(2.0),
        )));
        assert_eq!(engine.time_of_next_event(), minutes(5.0));
        engine.execute_transitions(minutes(5.0));
        assert!(
            engine.final_report().summary.contains("High"),
            "the late command must still apply"
        );
    }
}
