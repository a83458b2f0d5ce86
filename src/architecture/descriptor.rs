//! Declarative model descriptors: the serializable blueprint a composer
//! instantiates into live models and engines.
//!
//! A descriptor carries a model class name, a URI, and relation data. Feature
//! combinations (plain/HIOA, logical/real-time) are expressed by an explicit
//! [`Capabilities`] value on a single descriptor type rather than by a
//! subclass lattice.

use serde::{Deserialize, Serialize};

use crate::architecture::ArchitectureError;

/// Capability axes of a model: continuous variables and real-time pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// The model imports/exports continuous variables.
    pub hioa: bool,
    /// The model participates in wall-clock-paced runs.
    pub real_time: bool,
}

/// Declaration of one continuous variable slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    /// Slot name within the declaring model.
    pub name: String,
    /// Rust type name of the value, matched at binding time.
    pub type_name: String,
}

impl VariableDecl {
    /// Shorthand for a declaration.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Blueprint of one atomic model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtomicModelDescriptor {
    /// Unique model URI.
    pub uri: String,
    /// Factory key naming the model implementation.
    pub class: String,
    /// Capability axes.
    pub capabilities: Capabilities,
    /// Event kinds this model consumes.
    pub imported_events: Vec<String>,
    /// Event kinds this model emits.
    pub exported_events: Vec<String>,
    /// Continuous variables this model reads from other models.
    pub imported_variables: Vec<VariableDecl>,
    /// Continuous variables this model owns and publishes.
    pub exported_variables: Vec<VariableDecl>,
}

impl AtomicModelDescriptor {
    /// Creates a descriptor with empty relation sets.
    pub fn new(uri: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            class: class.into(),
            ..Self::default()
        }
    }

    /// `true` when this model declares `kind` among its exports.
    pub fn exports_event(&self, kind: &str) -> bool {
        self.exported_events.iter().any(|k| k == kind)
    }

    /// `true` when this model declares `kind` among its imports.
    pub fn imports_event(&self, kind: &str) -> bool {
        self.imported_events.iter().any(|k| k == kind)
    }

    /// Declaration of the named exported variable, if any.
    pub fn exported_variable(&self, name: &str) -> Option<&VariableDecl> {
        self.exported_variables.iter().find(|v| v.name == name)
    }

    /// Declaration of the named imported variable, if any.
    pub fn imported_variable(&self, name: &str) -> Option<&VariableDecl> {
        self.imported_variables.iter().find(|v| v.name == name)
    }
}

/// Source end of an internal event connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Emitting submodel URI.
    pub model: String,
    /// Emitted event kind.
    pub kind: String,
}

/// Internal connection: one submodel's export delivered to sibling
/// submodels. Listing several sinks broadcasts the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Emitting end.
    pub source: EventSource,
    /// Consuming submodel URIs.
    pub sinks: Vec<String>,
}

/// Redirection of an event arriving from the parent to submodels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedEventRoute {
    /// Kind as seen at this coupled model's boundary.
    pub kind: String,
    /// Consuming submodel URIs.
    pub sinks: Vec<String>,
}

/// Promotion of a submodel export to this coupled model's own boundary,
/// optionally under a new kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reexport {
    /// Emitting submodel URI.
    pub submodel: String,
    /// Kind emitted by the submodel.
    pub kind: String,
    /// Kind presented to the parent.
    pub as_kind: String,
}

/// One end of a continuous-variable binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableEnd {
    /// Atomic submodel URI owning (source) or importing (sink) the slot.
    pub model: String,
    /// Slot name within that model.
    pub name: String,
}

/// Reference hookup from one exported variable to importing submodels,
/// performed once at composition time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableBinding {
    /// Exporting end.
    pub source: VariableEnd,
    /// Importing ends.
    pub sinks: Vec<VariableEnd>,
}

/// Blueprint of one coupled model: submodels plus routing relations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoupledModelDescriptor {
    /// Unique model URI.
    pub uri: String,
    /// Capability axes.
    pub capabilities: Capabilities,
    /// URIs of the direct submodels.
    pub submodels: Vec<String>,
    /// Parent-to-submodel event redirections.
    pub imported_events: Vec<ImportedEventRoute>,
    /// Submodel-to-parent event promotions.
    pub reexported_events: Vec<Reexport>,
    /// Submodel-to-submodel event connections.
    pub connections: Vec<Connection>,
    /// Continuous-variable hookups between direct atomic submodels.
    pub variable_bindings: Vec<VariableBinding>,
}

impl CoupledModelDescriptor {
    /// Creates a descriptor with empty relation sets.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    fn declares(&self, uri: &str) -> bool {
        self.submodels.iter().any(|s| s == uri)
    }

    /// Internal-consistency violations of this descriptor alone: every
    /// relation must reference declared submodels and no model may receive
    /// its own export back (self-loop).
    ///
    /// Checked as a postcondition of descriptor construction by
    /// [`Architecture::validate`](crate::architecture::Architecture::validate).
    pub fn internal_consistency_errors(&self) -> Vec<ArchitectureError> {
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for submodel in &self.submodels {
            if !seen.insert(submodel.clone()) {
                errors.push(ArchitectureError::DuplicateSubmodel {
                    coupled: self.uri.clone(),
                    uri: submodel.clone(),
                });
            }
        }

        let mut require = |referenced: &str, relation: &'static str, errors: &mut Vec<_>| {
            if !self.declares(referenced) {
                errors.push(ArchitectureError::UnknownSubmodel {
                    coupled: self.uri.clone(),
                    referenced: referenced.to_string(),
                    relation,
                });
            }
        };

        for connection in &self.connections {
            require(&connection.source.model, "connections", &mut errors);
            for sink in &connection.sinks {
                require(sink, "connections", &mut errors);
                if *sink == connection.source.model {
                    errors.push(ArchitectureError::SelfLoop {
                        coupled: self.uri.clone(),
                        model: sink.clone(),
                        kind: connection.source.kind.clone(),
                    });
                }
            }
        }
        for route in &self.imported_events {
            for sink in &route.sinks {
                require(sink, "imported", &mut errors);
            }
        }
        for reexport in &self.reexported_events {
            require(&reexport.submodel, "reexported", &mut errors);
        }
        for binding in &self.variable_bindings {
            require(&binding.source.model, "bindings", &mut errors);
            for sink in &binding.sinks {
                require(&sink.model, "bindings", &mut errors);
                if sink.model == binding.source.model {
                    errors.push(ArchitectureError::SelfLoop {
                        coupled: self.uri.clone(),
                        model: sink.model.clone(),
                        kind: binding.source.name.clone(),
                    });
                }
            }
        }
        errors
    }

    /// `true` when [`CoupledModelDescriptor::internal_consistency_errors`]
    /// finds nothing.
    pub fn check_internal_consistency(&self) -> bool {
        self.internal_consistency_errors().is_empty()
    }

    /// Kinds this coupled model presents to its parent.
    pub fn exports_event(&self, kind: &str) -> bool {
        self.reexported_events.iter().any(|r| r.as_kind == kind)
    }

    /// Kinds this coupled model accepts from its parent.
    pub fn imports_event(&self, kind: &str) -> bool {
        self.imported_events.iter().any(|r| r.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_model_coupled() -> CoupledModelDescriptor {
        CoupledModelDescriptor {
            uri: "house".into(),
            submodels: vec!["a".into(), "b".into()],
            connections: vec![Connection {
                source: EventSource {
                    model: "a".into(),
                    kind: "tick".into(),
                },
                sinks: vec!["b".into()],
            }],
            ..CoupledModelDescriptor::new("house")
        }
    }

    #[test]
    fn valid_descriptor_is_internally_consistent() {
        assert!(two_model_coupled().check_internal_consistency());
    }

    #[test]
    fn unknown_sink_fails_internal_consistency() {
        let mut d = two_model_coupled();
        d.connections[0].sinks.push("ghost".into());
        assert!(!d.check_internal_consistency());
        assert!(
            d.internal_consistency_errors()
                .iter()
                .any(|e| matches!(e, ArchitectureError::UnknownSubmodel { referenced, .. } if referenced == "ghost"))
        );
    }

    #[test]
    fn unknown_reexport_source_fails_internal_consistency() {
        let mut d = two_model_coupled();
        d.reexported_events.push(Reexport {
            submodel: "ghost".into(),
            kind: "tick".into(),
            as_kind: "house.tick".into(),
        });
        assert!(!d.check_internal_consistency());
    }

    #[test]
    fn self_loop_fails_internal_consistency() {
        let mut d = two_model_coupled();
        d.connections[0].sinks = vec!["a".into()];
        assert!(
            d.internal_consistency_errors()
                .iter()
                .any(|e| matches!(e, ArchitectureError::SelfLoop { .. }))
        );
    }

    #[test]
    fn duplicate_submodel_fails_internal_consistency() {
        let mut d = two_model_coupled();
        d.submodels.push("a".into());
        assert!(
            d.internal_consistency_errors()
                .iter()
                .any(|e| matches!(e, ArchitectureError::DuplicateSubmodel { .. }))
        );
    }

    #[test]
    fn binding_to_unknown_model_fails_internal_consistency() {
        let mut d = two_model_coupled();
        d.variable_bindings.push(VariableBinding {
            source: VariableEnd {
                model: "a".into(),
                name: "x".into(),
            },
            sinks: vec![VariableEnd {
                model: "ghost".into(),
                name: "x".into(),
            }],
        });
        assert!(!d.check_internal_consistency());
    }

    #[test]
    fn descriptors_serialize_roundtrip() {
        let d = two_model_coupled();
        let toml = toml::to_string(&d).expect("serialize");
        let back: CoupledModelDescriptor = toml::from_str(&toml).expect("deserialize");
        assert_eq!(back.submodels, d.submodels);
        assert_eq!(back.connections, d.connections);
    }
}
