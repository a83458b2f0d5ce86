//! Coordinator engine: fans control out to child engines and routes their
//! event exports.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::engine::{SimulatorI, report::SimulationReport};
use crate::event::{EventI, RelabeledEvent};
use crate::model::{FixpointStatus, RunParameterError, RunParameters};
use crate::time::{Time, TimeUnit};
use crate::variable::VariableRegistry;

/// Compiled event-routing relations of one coupled model.
///
/// Keys are child-model URIs and event kinds as declared in the coupled
/// descriptor; the composer compiles descriptor relations into this table
/// once, at construction.
#[derive(Debug, Default, Clone)]
pub struct RoutingTable {
    /// (source child, kind) -> sink children (broadcast is legal).
    pub connections: HashMap<(String, String), Vec<String>>,
    /// Kind imported from the parent -> sink children.
    pub imported: HashMap<String, Vec<String>>,
    /// (source child, kind) -> parent-facing kind.
    pub reexported: HashMap<(String, String), String>,
}

/// Engine of a coupled model: owns its children's engines and no model state
/// of its own.
///
/// Its time of next event is the minimum over the children; ties between
/// simultaneously imminent children are resolved deterministically by child
/// declaration order, with same-instant events at each model ordered by event
/// priority.
pub struct CoordinatorEngine {
    uri: String,
    time_unit: TimeUnit,
    children: Vec<Box<dyn SimulatorI>>,
    index_by_uri: HashMap<String, usize>,
    routing: RoutingTable,
}

impl CoordinatorEngine {
    /// Composes `children` under the coupled model at `uri`.
    ///
    /// # Panics
    ///
    /// Panics on duplicate child URIs or a child with a different time unit;
    /// both indicate an architecture the consistency checks should have
    /// rejected.
    pub fn new(
        uri: impl Into<String>,
        time_unit: TimeUnit,
        children: Vec<Box<dyn SimulatorI>>,
        routing: RoutingTable,
    ) -> Self {
        let uri = uri.into();
        let mut index_by_uri = HashMap::new();
        for (i, child) in children.iter().enumerate() {
            assert!(
                child.time_unit() == time_unit,
                "coupled model {uri}: child {} uses time unit {}, expected {}",
                child.uri(),
                child.time_unit(),
                time_unit
            );
            let previous = index_by_uri.insert(child.uri().to_string(), i);
            assert!(
                previous.is_none(),
                "coupled model {uri}: duplicate child URI {}",
                child.uri()
            );
        }
        Self {
            uri,
            time_unit,
            children,
            index_by_uri,
            routing,
        }
    }

    fn deliver_to(&mut self, sink_uri: &str, event: Box<dyn EventI>) {
        let index = *self
            .index_by_uri
            .get(sink_uri)
            .unwrap_or_else(|| panic!("coupled model {}: no child {sink_uri}", self.uri));
        self.children[index].store_external_event(event);
    }
}

impl SimulatorI for CoordinatorEngine {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    fn initialise_simulation(&mut self, start: Time) {
        for child in &mut self.children {
            child.initialise_simulation(start);
        }
        trace!(uri = %self.uri, children = self.children.len(), "coordinator initialised");
    }

    fn model_count(&self) -> usize {
        self.children.iter().map(|c| c.model_count()).sum()
    }

    fn contains_model(&self, uri: &str) -> bool {
        self.children.iter().any(|c| c.contains_model(uri))
    }

    fn fixpoint_initialise_variables(&mut self) -> FixpointStatus {
        self.children
            .iter_mut()
            .map(|c| c.fixpoint_initialise_variables())
            .fold(FixpointStatus::settled(), FixpointStatus::merge)
    }

    fn variable_registry_of(&mut self, uri: &str) -> Option<&mut VariableRegistry> {
        self.children
            .iter_mut()
            .find_map(|c| c.variable_registry_of(uri))
    }

    fn time_of_next_event(&self) -> Time {
        self.children
            .iter()
            .map(|c| c.time_of_next_event())
            .fold(Time::infinity(self.time_unit), Time::min)
    }

    fn collect_outputs(&mut self, t: Time) -> Vec<Box<dyn EventI>> {
        // Phase one: gather outputs of every imminent child.
        let mut emitted: Vec<(String, Box<dyn EventI>)> = Vec::new();
        for child in &mut self.children {
            if child.time_of_next_event() == t {
                let source = child.uri().to_string();
                for event in child.collect_outputs(t) {
                    emitted.push((source.clone(), event));
                }
            }
        }

        // Phase two: route sideways per connections, upward per reexports.
        let mut to_parent: Vec<Box<dyn EventI>> = Vec::new();
        for (source, event) in emitted {
            let key = (source.clone(), event.kind().to_string());
            let mut routed = false;
            if let Some(sinks) = self.routing.connections.get(&key).cloned() {
                for sink in &sinks {
                    trace!(
                        coupled = %self.uri,
                        from = %source,
                        to = %sink,
                        kind = event.kind(),
                        at = %t,
                        "event routed"
                    );
                    self.deliver_to(sink, event.clone());
                }
                routed = true;
            }
            if let Some(as_kind) = self.routing.reexported.get(&key) {
                let reexport: Box<dyn EventI> = if as_kind == event.kind() {
                    event.clone()
                } else {
                    Box::new(RelabeledEvent::new(as_kind.clone(), event.clone()))
                };
                to_parent.push(reexport);
                routed = true;
            }
            if !routed {
                debug!(
                    coupled = %self.uri,
                    from = %source,
                    kind = event.kind(),
                    "exported event has no route, dropped"
                );
            }
        }
        to_parent
    }

    fn store_external_event(&mut self, event: Box<dyn EventI>) {
        let sinks = match self.routing.imported.get(event.kind()) {
            Some(sinks) => sinks.clone(),
            None => {
                warn!(
                    coupled = %self.uri,
                    kind = event.kind(),
                    "imported event kind has no declared sink, dropped"
                );
                return;
            }
        };
        for sink in &sinks {
            self.deliver_to(sink, event.clone());
        }
    }

    fn execute_transitions(&mut self, t: Time) {
        for child in &mut self.children {
            child.execute_transitions(t);
        }
    }

    fn set_run_parameters(&mut self, params: &RunParameters) -> Result<(), RunParameterError> {
        for child in &mut self.children {
            child.set_run_parameters(params)?;
        }
        Ok(())
    }

    fn end_simulation(&mut self, end: Time) {
        for child in &mut self.children {
            child.end_simulation(end);
        }
    }

    fn final_report(&self) -> SimulationReport {
        let children: Vec<SimulationReport> =
            self.children.iter().map(|c| c.final_report()).collect();
        SimulationReport::node(
            &self.uri,
            format!("coupled model, {} submodels", children.len()),
            children,
        )
    }
}
