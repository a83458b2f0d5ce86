//! Architecture layer: descriptor collections, consistency checking, and
//! composition of a live simulator tree.
//!
//! An [`Architecture`] is the full blueprint of one simulation: a root URI, a
//! shared time unit, and a descriptor per model. [`Architecture::validate`]
//! rejects malformed blueprints before any model is instantiated;
//! [`Architecture::construct_simulator`] composes engines bottom-up and wires
//! continuous-variable bindings.

pub mod descriptor;
pub mod factory;

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::engine::{AtomicEngine, CoordinatorEngine, RoutingTable, Simulation, SimulatorI};
use crate::model::{RunParameterError, RunParameters};
use crate::time::TimeUnit;
use crate::variable::BindingError;

pub use descriptor::{
    AtomicModelDescriptor, Capabilities, Connection, CoupledModelDescriptor, EventSource,
    ImportedEventRoute, Reexport, VariableBinding, VariableDecl, VariableEnd,
};
pub use factory::{AtomicModelFactoryI, ModelFactories};

/// A blueprint defect found during validation or composition.
#[derive(Debug, Error)]
pub enum ArchitectureError {
    #[error("no descriptor with root URI {uri}")]
    RootMissing { uri: String },
    #[error("model URI {uri} has both an atomic and a coupled descriptor")]
    DuplicateDescriptor { uri: String },
    #[error("coupled model {referenced_by} lists submodel {uri}, which has no descriptor")]
    MissingDescriptor { referenced_by: String, uri: String },
    #[error("coupled model {uri} contains itself, directly or transitively")]
    CyclicComposition { uri: String },
    #[error("coupled model {coupled}: {relation} relation references {referenced}, not a declared submodel")]
    UnknownSubmodel {
        coupled: String,
        referenced: String,
        relation: &'static str,
    },
    #[error("coupled model {coupled}: submodel {uri} declared twice")]
    DuplicateSubmodel { coupled: String, uri: String },
    #[error("coupled model {coupled}: {model} would receive its own {kind} back")]
    SelfLoop {
        coupled: String,
        model: String,
        kind: String,
    },
    #[error("coupled model {coupled}: {model} does not export event kind {kind}")]
    NotExportedEvent {
        coupled: String,
        model: String,
        kind: String,
    },
    #[error("coupled model {coupled}: {model} does not import event kind {kind}")]
    NotImportedEvent {
        coupled: String,
        model: String,
        kind: String,
    },
    #[error("coupled model {coupled}: {model} does not export variable {name}")]
    NotExportedVariable {
        coupled: String,
        model: String,
        name: String,
    },
    #[error("coupled model {coupled}: {model} does not import variable {name}")]
    NotImportedVariable {
        coupled: String,
        model: String,
        name: String,
    },
    #[error("coupled model {coupled}: binding endpoint {model} is not an atomic model")]
    NotAtomicEndpoint { coupled: String, model: String },
    #[error(
        "coupled model {coupled}: variable {source_model}.{source_name} is {source_type}, \
         but sink {sink_model}.{sink_name} expects {sink_type}"
    )]
    VariableTypeMismatch {
        coupled: String,
        source_model: String,
        source_name: String,
        source_type: String,
        sink_model: String,
        sink_name: String,
        sink_type: String,
    },
    #[error("imported variable {model}.{name} is bound by no coupled descriptor")]
    UnboundVariable { model: String, name: String },
    #[error("imported variable {model}.{name} is bound more than once")]
    DoublyBoundVariable { model: String, name: String },
    #[error("model {uri} names class {class}, for which no factory is registered")]
    UnknownModelClass { uri: String, class: String },
    #[error("factory for {uri} failed: {reason}")]
    Factory { uri: String, reason: String },
    #[error("model {uri} has no variable registry, yet a binding references it")]
    NoVariableRegistry { uri: String },
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    RunParameter(#[from] RunParameterError),
}

/// Full blueprint of one simulation.
pub struct Architecture {
    root_uri: String,
    time_unit: TimeUnit,
    atomics: HashMap<String, AtomicModelDescriptor>,
    coupled: HashMap<String, CoupledModelDescriptor>,
}

impl Architecture {
    /// Creates an empty architecture rooted at `root_uri`.
    pub fn new(root_uri: impl Into<String>, time_unit: TimeUnit) -> Self {
        Self {
            root_uri: root_uri.into(),
            time_unit,
            atomics: HashMap::new(),
            coupled: HashMap::new(),
        }
    }

    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Adds an atomic descriptor, replacing any previous one with the same URI.
    pub fn add_atomic(&mut self, descriptor: AtomicModelDescriptor) -> &mut Self {
        self.atomics.insert(descriptor.uri.clone(), descriptor);
        self
    }

    /// Adds a coupled descriptor, replacing any previous one with the same URI.
    pub fn add_coupled(&mut self, descriptor: CoupledModelDescriptor) -> &mut Self {
        self.coupled.insert(descriptor.uri.clone(), descriptor);
        self
    }

    pub fn atomic(&self, uri: &str) -> Option<&AtomicModelDescriptor> {
        self.atomics.get(uri)
    }

    pub fn coupled(&self, uri: &str) -> Option<&CoupledModelDescriptor> {
        self.coupled.get(uri)
    }

    fn has_descriptor(&self, uri: &str) -> bool {
        self.atomics.contains_key(uri) || self.coupled.contains_key(uri)
    }

    /// All blueprint defects, or an empty vector for a well-formed
    /// architecture. Composition refuses to start unless this is empty.
    pub fn validate(&self) -> Vec<ArchitectureError> {
        let mut errors = Vec::new();

        if !self.has_descriptor(&self.root_uri) {
            errors.push(ArchitectureError::RootMissing {
                uri: self.root_uri.clone(),
            });
            return errors;
        }
        for uri in self.atomics.keys() {
            if self.coupled.contains_key(uri) {
                errors.push(ArchitectureError::DuplicateDescriptor { uri: uri.clone() });
            }
        }

        // Walk the composition tree from the root: every referenced submodel
        // must have a descriptor and no model may contain itself.
        let mut visited = HashSet::new();
        self.walk(&self.root_uri, &mut Vec::new(), &mut visited, &mut errors);

        for uri in &visited {
            if let Some(d) = self.coupled.get(uri) {
                errors.extend(d.internal_consistency_errors());
                errors.extend(self.full_consistency_errors(d));
            }
        }
        errors.extend(self.binding_coverage_errors(&visited));
        errors
    }

    fn walk(
        &self,
        uri: &str,
        stack: &mut Vec<String>,
        visited: &mut HashSet<String>,
        errors: &mut Vec<ArchitectureError>,
    ) {
        if stack.iter().any(|s| s == uri) {
            errors.push(ArchitectureError::CyclicComposition {
                uri: uri.to_string(),
            });
            return;
        }
        if !visited.insert(uri.to_string()) {
            return;
        }
        if let Some(d) = self.coupled.get(uri) {
            stack.push(uri.to_string());
            for submodel in &d.submodels {
                if self.has_descriptor(submodel) {
                    self.walk(submodel, stack, visited, errors);
                } else {
                    errors.push(ArchitectureError::MissingDescriptor {
                        referenced_by: uri.to_string(),
                        uri: submodel.clone(),
                    });
                }
            }
            stack.pop();
        }
    }

    fn exports_event(&self, uri: &str, kind: &str) -> bool {
        self.atomics
            .get(uri)
            .map(|d| d.exports_event(kind))
            .or_else(|| self.coupled.get(uri).map(|d| d.exports_event(kind)))
            .unwrap_or(false)
    }

    fn imports_event(&self, uri: &str, kind: &str) -> bool {
        self.atomics
            .get(uri)
            .map(|d| d.imports_event(kind))
            .or_else(|| self.coupled.get(uri).map(|d| d.imports_event(kind)))
            .unwrap_or(false)
    }

    /// Full-consistency violations of one coupled descriptor: every routed
    /// event kind must be declared by the endpoint models, and every variable
    /// binding must connect an atomic export to type-compatible atomic
    /// imports.
    fn full_consistency_errors(&self, d: &CoupledModelDescriptor) -> Vec<ArchitectureError> {
        let mut errors = Vec::new();
        let mut check_sink = |model: &str, kind: &str, errors: &mut Vec<_>| {
            if self.has_descriptor(model) && !self.imports_event(model, kind) {
                errors.push(ArchitectureError::NotImportedEvent {
                    coupled: d.uri.clone(),
                    model: model.to_string(),
                    kind: kind.to_string(),
                });
            }
        };

        for connection in &d.connections {
            let source = &connection.source;
            if self.has_descriptor(&source.model) && !self.exports_event(&source.model, &source.kind)
            {
                errors.push(ArchitectureError::NotExportedEvent {
                    coupled: d.uri.clone(),
                    model: source.model.clone(),
                    kind: source.kind.clone(),
                });
            }
            for sink in &connection.sinks {
                check_sink(sink, &source.kind, &mut errors);
            }
        }
        for route in &d.imported_events {
            for sink in &route.sinks {
                check_sink(sink, &route.kind, &mut errors);
            }
        }
        for reexport in &d.reexported_events {
            if self.has_descriptor(&reexport.submodel)
                && !self.exports_event(&reexport.submodel, &reexport.kind)
            {
                errors.push(ArchitectureError::NotExportedEvent {
                    coupled: d.uri.clone(),
                    model: reexport.submodel.clone(),
                    kind: reexport.kind.clone(),
                });
            }
        }

        for binding in &d.variable_bindings {
            let source_decl = match self.atomics.get(&binding.source.model) {
                None => {
                    if self.has_descriptor(&binding.source.model) {
                        errors.push(ArchitectureError::NotAtomicEndpoint {
                            coupled: d.uri.clone(),
                            model: binding.source.model.clone(),
                        });
                    }
                    None
                }
                Some(a) => {
                    let decl = a.exported_variable(&binding.source.name);
                    if decl.is_none() {
                        errors.push(ArchitectureError::NotExportedVariable {
                            coupled: d.uri.clone(),
                            model: binding.source.model.clone(),
                            name: binding.source.name.clone(),
                        });
                    }
                    decl
                }
            };
            for sink in &binding.sinks {
                let Some(a) = self.atomics.get(&sink.model) else {
                    if self.has_descriptor(&sink.model) {
                        errors.push(ArchitectureError::NotAtomicEndpoint {
                            coupled: d.uri.clone(),
                            model: sink.model.clone(),
                        });
                    }
                    continue;
                };
                let Some(sink_decl) = a.imported_variable(&sink.name) else {
                    errors.push(ArchitectureError::NotImportedVariable {
                        coupled: d.uri.clone(),
                        model: sink.model.clone(),
                        name: sink.name.clone(),
                    });
                    continue;
                };
                if let Some(source_decl) = source_decl
                    && source_decl.type_name != sink_decl.type_name
                {
                    errors.push(ArchitectureError::VariableTypeMismatch {
                        coupled: d.uri.clone(),
                        source_model: binding.source.model.clone(),
                        source_name: binding.source.name.clone(),
                        source_type: source_decl.type_name.clone(),
                        sink_model: sink.model.clone(),
                        sink_name: sink.name.clone(),
                        sink_type: sink_decl.type_name.clone(),
                    });
                }
            }
        }
        errors
    }

    /// Every declared variable import must be the sink of exactly one binding
    /// across the reachable coupled descriptors; a model whose import stays
    /// unbound would block fixpoint initialisation forever.
    fn binding_coverage_errors(&self, visited: &HashSet<String>) -> Vec<ArchitectureError> {
        let mut bound_count: HashMap<(String, String), usize> = HashMap::new();
        for uri in visited {
            if let Some(d) = self.coupled.get(uri) {
                for binding in &d.variable_bindings {
                    for sink in &binding.sinks {
                        *bound_count
                            .entry((sink.model.clone(), sink.name.clone()))
                            .or_insert(0) += 1;
                    }
                }
            }
        }

        let mut errors = Vec::new();
        let mut uris: Vec<&String> = visited.iter().collect();
        uris.sort();
        for uri in uris {
            if let Some(a) = self.atomics.get(uri.as_str()) {
                for decl in &a.imported_variables {
                    match bound_count
                        .get(&(a.uri.clone(), decl.name.clone()))
                        .copied()
                        .unwrap_or(0)
                    {
                        0 => errors.push(ArchitectureError::UnboundVariable {
                            model: a.uri.clone(),
                            name: decl.name.clone(),
                        }),
                        1 => {}
                        _ => errors.push(ArchitectureError::DoublyBoundVariable {
                            model: a.uri.clone(),
                            name: decl.name.clone(),
                        }),
                    }
                }
            }
        }
        errors
    }

    /// Validates the blueprint, then composes the engine tree bottom-up,
    /// wires variable bindings, and applies `params` to the built models.
    ///
    /// # Errors
    ///
    /// Returns every validation error at once when the blueprint is
    /// malformed, or the first composition failure (missing factory, factory
    /// error, rejected run parameter) otherwise.
    pub fn construct_simulator(
        &self,
        factories: &ModelFactories,
        params: &RunParameters,
    ) -> Result<Simulation, Vec<ArchitectureError>> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(errors);
        }

        let root = self
            .build(&self.root_uri, factories)
            .map_err(|e| vec![e])?;
        let mut simulation = Simulation::new(root);
        if !params.is_empty() {
            simulation
                .set_run_parameters(params)
                .map_err(|e| vec![ArchitectureError::from(e)])?;
        }
        debug!(root = %self.root_uri, models = self.atomics.len(), "simulator composed");
        Ok(simulation)
    }

    fn build(
        &self,
        uri: &str,
        factories: &ModelFactories,
    ) -> Result<Box<dyn SimulatorI>, ArchitectureError> {
        if let Some(a) = self.atomics.get(uri) {
            let factory =
                factories
                    .get(&a.class)
                    .ok_or_else(|| ArchitectureError::UnknownModelClass {
                        uri: a.uri.clone(),
                        class: a.class.clone(),
                    })?;
            let model = factory.create(a, self.time_unit)?;
            assert_eq!(
                model.uri(),
                uri,
                "factory for class {} built a model with the wrong URI",
                a.class
            );
            return Ok(Box::new(AtomicEngine::new(model)));
        }

        // validate() ran first, so the descriptor exists.
        let d = &self.coupled[uri];
        let children = d
            .submodels
            .iter()
            .map(|submodel| self.build(submodel, factories))
            .collect::<Result<Vec<_>, _>>()?;

        let mut routing = RoutingTable::default();
        for connection in &d.connections {
            routing.connections.insert(
                (connection.source.model.clone(), connection.source.kind.clone()),
                connection.sinks.clone(),
            );
        }
        for route in &d.imported_events {
            routing
                .imported
                .insert(route.kind.clone(), route.sinks.clone());
        }
        for reexport in &d.reexported_events {
            routing.reexported.insert(
                (reexport.submodel.clone(), reexport.kind.clone()),
                reexport.as_kind.clone(),
            );
        }

        let mut engine = CoordinatorEngine::new(uri, self.time_unit, children, routing);
        for binding in &d.variable_bindings {
            for sink in &binding.sinks {
                let (type_name, handle) = engine
                    .variable_registry_of(&binding.source.model)
                    .ok_or_else(|| ArchitectureError::NoVariableRegistry {
                        uri: binding.source.model.clone(),
                    })?
                    .exported_handle(&binding.source.name)?;
                engine
                    .variable_registry_of(&sink.model)
                    .ok_or_else(|| ArchitectureError::NoVariableRegistry {
                        uri: sink.model.clone(),
                    })?
                    .bind_import(&sink.name, type_name, handle.as_ref())?;
            }
        }
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn architecture_with(root: CoupledModelDescriptor) -> Architecture {
        let mut arch = Architecture::new(root.uri.clone(), TimeUnit::Seconds);
        for submodel in &root.submodels {
            arch.add_atomic(AtomicModelDescriptor::new(submodel.clone(), "Stub"));
        }
        arch.add_coupled(root);
        arch
    }

    #[test]
    fn valid_flat_architecture_passes() {
        let arch = architecture_with(CoupledModelDescriptor {
            submodels: vec!["a".into(), "b".into()],
            ..CoupledModelDescriptor::new("house")
        });
        assert!(arch.validate().is_empty());
    }

    #[test]
    fn missing_root_is_reported() {
        let arch = Architecture::new("nowhere", TimeUnit::Seconds);
        assert!(matches!(
            arch.validate().as_slice(),
            [ArchitectureError::RootMissing { .. }]
        ));
    }

    #[test]
    fn missing_submodel_descriptor_is_reported() {
        let mut arch = architecture_with(CoupledModelDescriptor {
            submodels: vec!["a".into()],
            ..CoupledModelDescriptor::new("house")
        });
        if let Some(d) = arch.coupled.get_mut("house") {
            d.submodels.push("ghost".into());
        }
        assert!(arch.validate().iter().any(|e| matches!(
            e,
            ArchitectureError::MissingDescriptor { uri, .. } if uri == "ghost"
        )));
    }

    #[test]
    fn cyclic_composition_is_reported() {
        let mut arch = Architecture::new("outer", TimeUnit::Seconds);
        arch.add_coupled(CoupledModelDescriptor {
            submodels: vec!["inner".into()],
            ..CoupledModelDescriptor::new("outer")
        });
        arch.add_coupled(CoupledModelDescriptor {
            submodels: vec!["outer".into()],
            ..CoupledModelDescriptor::new("inner")
        });
        assert!(arch
            .validate()
            .iter()
            .any(|e| matches!(e, ArchitectureError::CyclicComposition { .. })));
    }

    #[test]
    fn undeclared_event_kinds_fail_full_consistency() {
        let mut arch = architecture_with(CoupledModelDescriptor {
            submodels: vec!["a".into(), "b".into()],
            connections: vec![Connection {
                source: EventSource {
                    model: "a".into(),
                    kind: "tick".into(),
                },
                sinks: vec!["b".into()],
            }],
            ..CoupledModelDescriptor::new("house")
        });
        // Neither a exports "tick" nor b imports it.
        let errors = arch.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ArchitectureError::NotExportedEvent { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ArchitectureError::NotImportedEvent { .. })));

        if let Some(a) = arch.atomics.get_mut("a") {
            a.exported_events.push("tick".into());
        }
        if let Some(b) = arch.atomics.get_mut("b") {
            b.imported_events.push("tick".into());
        }
        assert!(arch.validate().is_empty());
    }

    #[test]
    fn variable_type_mismatch_is_reported() {
        let mut arch = architecture_with(CoupledModelDescriptor {
            submodels: vec!["a".into(), "b".into()],
            variable_bindings: vec![VariableBinding {
                source: VariableEnd {
                    model: "a".into(),
                    name: "temp".into(),
                },
                sinks: vec![VariableEnd {
                    model: "b".into(),
                    name: "temp_in".into(),
                }],
            }],
            ..CoupledModelDescriptor::new("house")
        });
        if let Some(a) = arch.atomics.get_mut("a") {
            a.exported_variables.push(VariableDecl::new("temp", "f64"));
        }
        if let Some(b) = arch.atomics.get_mut("b") {
            b.imported_variables
                .push(VariableDecl::new("temp_in", "bool"));
        }
        assert!(arch
            .validate()
            .iter()
            .any(|e| matches!(e, ArchitectureError::VariableTypeMismatch { .. })));
    }

    #[test]
    fn unbound_variable_import_is_reported() {
        let mut arch = architecture_with(CoupledModelDescriptor {
            submodels: vec!["a".into(), "b".into()],
            ..CoupledModelDescriptor::new("house")
        });
        if let Some(b) = arch.atomics.get_mut("b") {
            b.imported_variables
                .push(VariableDecl::new("temp_in", "f64"));
        }
        assert!(arch.validate().iter().any(|e| matches!(
            e,
            ArchitectureError::UnboundVariable { model, name } if model == "b" && name == "temp_in"
        )));
    }

    #[test]
    fn unknown_class_aborts_composition() {
        let arch = architecture_with(CoupledModelDescriptor {
            submodels: vec!["a".into()],
            ..CoupledModelDescriptor::new("house")
        });
        let result = arch.construct_simulator(&ModelFactories::new(), &RunParameters::default());
        assert!(matches!(
            result.err().as_deref(),
            Some([ArchitectureError::UnknownModelClass { class, .. }]) if class == "Stub"
        ));
    }
}
