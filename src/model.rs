//! The atomic simulation model contract and shared model plumbing.

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::report::SimulationReport;
use crate::event::{EventI, sort_by_priority};
use crate::time::{Duration, Time, TimeUnit};
use crate::variable::VariableRegistry;

/// Named numeric overrides for specific model instances, keyed by model URI.
///
/// Applied once, before a run starts; each model instance receives its own
/// values at construction, so repeated runs in one process never share state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunParameters {
    models: HashMap<String, HashMap<String, f64>>,
}

impl RunParameters {
    /// Records an override for parameter `name` of the model at `uri`.
    pub fn set(&mut self, uri: impl Into<String>, name: impl Into<String>, value: f64) {
        self.models
            .entry(uri.into())
            .or_default()
            .insert(name.into(), value);
    }

    /// All overrides destined to the model at `uri`.
    pub fn for_model(&self, uri: &str) -> Option<&HashMap<String, f64>> {
        self.models.get(uri)
    }

    /// Single override lookup.
    pub fn get(&self, uri: &str, name: &str) -> Option<f64> {
        self.models.get(uri).and_then(|m| m.get(name)).copied()
    }

    /// URIs of all models with recorded overrides.
    pub fn model_uris(&self) -> impl Iterator<Item = &String> {
        self.models.keys()
    }

    /// `true` when no override is recorded.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Rejection of a run-parameter override.
#[derive(Debug, Error)]
pub enum RunParameterError {
    /// No composed model carries the targeted URI; catches typos that would
    /// otherwise make the whole override set a silent no-op.
    #[error("run parameters target {uri}, but no composed model has that URI")]
    UnknownModel {
        /// Targeted model URI.
        uri: String,
    },
    /// The model does not define the named parameter.
    #[error("model {uri}: unknown run parameter \"{name}\"")]
    Unknown {
        /// Target model URI.
        uri: String,
        /// Parameter name.
        name: String,
    },
    /// The value violates a model constraint.
    #[error("model {uri}: run parameter \"{name}\" = {value} rejected: {constraint}")]
    Invalid {
        /// Target model URI.
        uri: String,
        /// Parameter name.
        name: String,
        /// Offending value.
        value: f64,
        /// Violated constraint.
        constraint: String,
    },
}

/// Outcome of one round of fixpoint variable initialisation on one model or
/// one subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixpointStatus {
    /// Variables initialised during this round.
    pub just_initialised: usize,
    /// Variables still waiting on uninitialised imports.
    pub still_blocked: usize,
}

impl FixpointStatus {
    /// Status of a model with nothing left to initialise.
    pub fn settled() -> Self {
        Self::default()
    }

    /// Sums two statuses (used by coordinators aggregating children).
    pub fn merge(self, other: FixpointStatus) -> FixpointStatus {
        FixpointStatus {
            just_initialised: self.just_initialised + other.just_initialised,
            still_blocked: self.still_blocked + other.still_blocked,
        }
    }
}

/// The leaf simulation unit: owns local state and implements the DEVS
/// transition functions.
///
/// Concrete models embed an [`AtomicModelCore`] for URI, simulated clock, and
/// input-event buffering, and expose it through [`AtomicModelI::core`].
///
/// Transition conventions:
/// - `elapsed` is the simulated time since the model's previous transition;
///   implementations advance their clock with `core_mut().advance_time`.
/// - `external_transition` retrieves its input batch once via
///   [`AtomicModelCore::take_stored_events`] (get-and-reset), already sorted
///   by event priority.
/// - `confluent_transition` fires when an internal transition and external
///   events coincide; the default policy runs the external transition first,
///   then the internal one at zero elapsed time. This ordering is a stated
///   design rule, not an accident, and is covered by tests.
pub trait AtomicModelI: Send {
    /// Shared model plumbing.
    fn core(&self) -> &AtomicModelCore;

    /// Shared model plumbing, mutably.
    fn core_mut(&mut self) -> &mut AtomicModelCore;

    /// Unique model URI.
    fn uri(&self) -> &str {
        self.core().uri()
    }

    /// Simulated time unit of this model.
    fn time_unit(&self) -> TimeUnit {
        self.core().time_unit()
    }

    /// Resets model state for a run starting at `initial_time`.
    fn initialise_state(&mut self, initial_time: Time);

    /// Delay until the next internal transition, or
    /// `Duration::infinity(..)` when none is scheduled.
    fn time_advance(&self) -> Duration;

    /// Events emitted at the instant of the next internal transition; called
    /// immediately before [`AtomicModelI::internal_transition`].
    fn output(&mut self) -> Vec<Box<dyn EventI>>;

    /// Internal transition at the instant scheduled by `time_advance`.
    fn internal_transition(&mut self, elapsed: Duration);

    /// External transition consuming the buffered input events.
    fn external_transition(&mut self, elapsed: Duration);

    /// Policy when internal and external transitions coincide: external
    /// before internal.
    fn confluent_transition(&mut self, elapsed: Duration) {
        self.external_transition(elapsed);
        self.internal_transition(Duration::zero(self.time_unit()));
    }

    /// One round of HIOA variable initialisation: initialise what the
    /// already-initialised imports allow, report the rest as blocked.
    fn fixpoint_initialise_variables(&mut self) -> FixpointStatus {
        FixpointStatus::settled()
    }

    /// Variable slots of an HIOA model, if any.
    fn variable_registry_mut(&mut self) -> Option<&mut VariableRegistry> {
        None
    }

    /// Applies per-instance numeric overrides before a run starts.
    fn set_run_parameters(&mut self, _params: &RunParameters) -> Result<(), RunParameterError> {
        Ok(())
    }

    /// Notification that the run reached `end_time`.
    fn end_simulation(&mut self, end_time: Time);

    /// Model-local contribution to the recursive simulation report.
    fn final_report(&self) -> SimulationReport;

    /// Downcast support for [`EventI::execute_on`] implementations.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Plumbing embedded by every atomic model: URI, simulated clock, and the
/// get-and-reset input-event buffer.
pub struct AtomicModelCore {
    uri: String,
    time_unit: TimeUnit,
    current_time: Time,
    stored: Vec<Box<dyn EventI>>,
    batch_taken: bool,
}

impl AtomicModelCore {
    /// Creates the plumbing for the model at `uri`.
    pub fn new(uri: impl Into<String>, time_unit: TimeUnit) -> Self {
        Self {
            uri: uri.into(),
            time_unit,
            current_time: Time::zero(time_unit),
            stored: Vec::new(),
            batch_taken: false,
        }
    }

    /// Model URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Simulated time unit.
    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Simulated instant of the model's last transition.
    pub fn current_time(&self) -> Time {
        self.current_time
    }

    /// Resets clock and buffer at the start of a run.
    pub fn initialise(&mut self, at: Time) {
        assert!(
            at.unit() == self.time_unit,
            "model {}: start instant unit {} does not match model unit {}",
            self.uri,
            at.unit(),
            self.time_unit
        );
        self.current_time = at;
        self.stored.clear();
        self.batch_taken = false;
    }

    /// Advances the model clock by `elapsed`; called at the start of each
    /// transition.
    pub fn advance_time(&mut self, elapsed: Duration) {
        self.current_time = self.current_time.add(elapsed);
    }

    /// Buffers an incoming event for the next external (or confluent)
    /// transition.
    pub fn store_input_event(&mut self, event: Box<dyn EventI>) {
        self.stored.push(event);
        self.batch_taken = false;
    }

    /// `true` when events are buffered and not yet consumed.
    pub fn has_stored_events(&self) -> bool {
        !self.stored.is_empty()
    }

    /// Returns the buffered events sorted by priority and clears the buffer.
    ///
    /// Get-and-reset semantics: exactly one retrieval per transition.
    ///
    /// # Panics
    ///
    /// Panics on a second retrieval with no intervening delivery.
    pub fn take_stored_events(&mut self) -> Vec<Box<dyn EventI>> {
        assert!(
            !self.batch_taken,
            "model {}: input events retrieved twice in one transition",
            self.uri
        );
        self.batch_taken = true;
        sort_by_priority(std::mem::take(&mut self.stored))
    }
}
