//! Continuous-state variables shared between HIOA models.
//!
//! A [`Variable`] is owned by exactly one model and read, through a
//! lock-guarded [`VariableHandle`], by any number of importing models.
//! Bindings are reference hookups performed once at composition time through
//! the [`VariableRegistry`], where each model explicitly registers its
//! exported and imported slots by name and type.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::time::{Duration, Time, TimeUnit};

/// Per-type strategy for evaluating a value history at an arbitrary instant.
///
/// `samples` is never empty and is sorted by time.
pub trait Interpolator<T>: Send + Sync {
    /// Interpolated (or extrapolated) value at `t`.
    fn evaluate_at(&self, samples: &[(Time, T)], t: Time) -> T;
}

/// Piecewise-constant interpolation: the last sample at or before `t`, or the
/// first sample when `t` precedes the whole history.
pub struct StepInterpolator;

impl<T: Clone> Interpolator<T> for StepInterpolator {
    fn evaluate_at(&self, samples: &[(Time, T)], t: Time) -> T {
        let mut current = &samples[0].1;
        for (at, value) in samples {
            if at.is_before_or_equal(t) {
                current = value;
            } else {
                break;
            }
        }
        current.clone()
    }
}

/// Linear interpolation between bracketing samples, with linear extrapolation
/// from the two nearest samples beyond either end of the history.
pub struct LinearInterpolator;

impl Interpolator<f64> for LinearInterpolator {
    fn evaluate_at(&self, samples: &[(Time, f64)], t: Time) -> f64 {
        if samples.len() == 1 {
            return samples[0].1;
        }
        // Pick the segment bracketing t, or the nearest end segment.
        let last = samples.len() - 1;
        let mut hi = 1;
        while hi < last && samples[hi].0.is_before_or_equal(t) {
            hi += 1;
        }
        let (t0, v0) = samples[hi - 1];
        let (t1, v1) = samples[hi];
        let span = t1.value() - t0.value();
        if span == 0.0 {
            return v1;
        }
        v0 + (v1 - v0) * (t.value() - t0.value()) / span
    }
}

/// Bounded, time-windowed record of past values backing interpolation.
pub struct ValueHistory<T> {
    window: Duration,
    samples: Vec<(Time, T)>,
    interpolator: Box<dyn Interpolator<T>>,
}

impl<T> ValueHistory<T> {
    /// Creates an empty history keeping samples no older than `window` behind
    /// the most recent one.
    pub fn new(window: Duration, interpolator: Box<dyn Interpolator<T>>) -> Self {
        Self {
            window,
            samples: Vec::new(),
            interpolator,
        }
    }

    fn push(&mut self, at: Time, value: T) {
        self.samples.push((at, value));
        let cutoff = at.value() - self.window.value();
        // Keep the newest sample unconditionally.
        let newest = self.samples.len() - 1;
        let mut i = 0;
        self.samples.retain(|(t, _)| {
            let keep = t.value() >= cutoff || i == newest;
            i += 1;
            keep
        });
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    fn evaluate_at(&self, t: Time) -> T {
        self.interpolator.evaluate_at(&self.samples, t)
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when no sample has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A named, typed, time-stamped slot holding one continuous or piecewise
/// value.
///
/// Invariants: the value must be initialised before any read; value
/// timestamps are monotonically non-decreasing; all timestamps share the
/// owner's simulated time unit. Violations are programming errors and panic.
pub struct Variable<T> {
    name: String,
    owner_uri: String,
    unit: TimeUnit,
    current: Option<(T, Time)>,
    history: Option<ValueHistory<T>>,
}

impl<T: Clone> Variable<T> {
    /// Creates an uninitialised variable owned by `owner_uri`.
    pub fn new(name: impl Into<String>, owner_uri: impl Into<String>, unit: TimeUnit) -> Self {
        Self {
            name: name.into(),
            owner_uri: owner_uri.into(),
            unit,
            current: None,
            history: None,
        }
    }

    /// Attaches a bounded history used by [`Variable::evaluate_at`].
    pub fn with_history(mut self, history: ValueHistory<T>) -> Self {
        self.history = Some(history);
        self
    }

    /// Variable name within its owner.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URI of the owning model.
    pub fn owner_uri(&self) -> &str {
        &self.owner_uri
    }

    /// `true` once [`Variable::initialise`] has run.
    pub fn is_initialised(&self) -> bool {
        self.current.is_some()
    }

    /// Sets the first value, before the simulation starts.
    ///
    /// Does not push to the history.
    ///
    /// # Panics
    ///
    /// Panics if already initialised or if `at` is in the wrong unit.
    pub fn initialise(&mut self, value: T, at: Time) {
        assert!(
            self.current.is_none(),
            "variable {}.{} initialised twice",
            self.owner_uri,
            self.name
        );
        assert!(
            at.unit() == self.unit,
            "variable {}.{}: initial time unit {} does not match owner unit {}",
            self.owner_uri,
            self.name,
            at.unit(),
            self.unit
        );
        self.current = Some((value, at));
    }

    /// Replaces the current value at instant `at`.
    ///
    /// # Panics
    ///
    /// Panics if not initialised, if `at` precedes the current timestamp, or
    /// if `at` is in the wrong unit.
    pub fn set_new_value(&mut self, value: T, at: Time) {
        let (_, current_time) = self
            .current
            .as_ref()
            .unwrap_or_else(|| {
                panic!(
                    "variable {}.{} written before initialisation",
                    self.owner_uri, self.name
                )
            });
        assert!(
            current_time.is_before_or_equal(at),
            "variable {}.{}: non-monotonic write at {} (current {})",
            self.owner_uri,
            self.name,
            at,
            current_time
        );
        if let Some(history) = &mut self.history {
            history.push(at, value.clone());
        }
        self.current = Some((value, at));
    }

    /// Current raw value.
    ///
    /// # Panics
    ///
    /// Panics if not initialised.
    pub fn value(&self) -> T {
        self.assert_initialised();
        self.current.as_ref().map(|(v, _)| v.clone()).unwrap()
    }

    /// Timestamp of the last assignment.
    ///
    /// # Panics
    ///
    /// Panics if not initialised.
    pub fn time_of_last_value(&self) -> Time {
        self.assert_initialised();
        self.current.as_ref().map(|(_, t)| *t).unwrap()
    }

    /// Value at instant `t`: interpolated/extrapolated from the history when
    /// one exists and has samples, otherwise the current raw value regardless
    /// of `t`.
    ///
    /// # Panics
    ///
    /// Panics if not initialised.
    pub fn evaluate_at(&self, t: Time) -> T {
        self.assert_initialised();
        match &self.history {
            Some(history) if !history.is_empty() => history.evaluate_at(t),
            _ => self.value(),
        }
    }

    /// Clears the value and history for reuse across repeated runs of the
    /// same model instance.
    pub fn reinitialise(&mut self) {
        self.current = None;
        if let Some(history) = &mut self.history {
            history.clear();
        }
    }

    fn assert_initialised(&self) {
        assert!(
            self.current.is_some(),
            "variable {}.{} read before initialisation",
            self.owner_uri,
            self.name
        );
    }
}

/// Shared, lock-guarded handle to a [`Variable`].
///
/// The owning model writes through its handle; importing models read through
/// clones of it, possibly from a different real-time scheduling thread, so
/// every accessor takes the lock.
pub struct VariableHandle<T>(Arc<RwLock<Variable<T>>>);

impl<T> Clone for VariableHandle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> VariableHandle<T> {
    /// Wraps a variable in a shareable handle.
    pub fn new(variable: Variable<T>) -> Self {
        Self(Arc::new(RwLock::new(variable)))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Variable<T>> {
        self.0.read().expect("variable lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Variable<T>> {
        self.0.write().expect("variable lock poisoned")
    }

    /// See [`Variable::initialise`].
    pub fn initialise(&self, value: T, at: Time) {
        self.write().initialise(value, at);
    }

    /// See [`Variable::set_new_value`].
    pub fn set_new_value(&self, value: T, at: Time) {
        self.write().set_new_value(value, at);
    }

    /// See [`Variable::is_initialised`].
    pub fn is_initialised(&self) -> bool {
        self.read().is_initialised()
    }

    /// See [`Variable::value`].
    pub fn value(&self) -> T {
        self.read().value()
    }

    /// See [`Variable::time_of_last_value`].
    pub fn time_of_last_value(&self) -> Time {
        self.read().time_of_last_value()
    }

    /// See [`Variable::evaluate_at`].
    pub fn evaluate_at(&self, t: Time) -> T {
        self.read().evaluate_at(t)
    }

    /// See [`Variable::reinitialise`].
    pub fn reinitialise(&self) {
        self.write().reinitialise();
    }
}

/// An importing model's slot for another model's exported variable.
///
/// Unbound until composition wires it to the exporter's handle; reading an
/// unbound import is a fatal construction-order error.
pub struct ImportedVariable<T> {
    name: String,
    binding: Arc<RwLock<Option<VariableHandle<T>>>>,
}

impl<T> Clone for ImportedVariable<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            binding: Arc::clone(&self.binding),
        }
    }
}

impl<T: Clone> ImportedVariable<T> {
    /// Creates an unbound import slot named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: Arc::new(RwLock::new(None)),
        }
    }

    /// Local name of this import.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, handle: VariableHandle<T>) {
        let mut slot = self.binding.write().expect("import binding lock poisoned");
        assert!(slot.is_none(), "imported variable \"{}\" bound twice", self.name);
        *slot = Some(handle);
    }

    /// `true` once composition has wired this slot to an exporter.
    pub fn is_bound(&self) -> bool {
        self.binding
            .read()
            .expect("import binding lock poisoned")
            .is_some()
    }

    fn bound(&self) -> VariableHandle<T> {
        self.binding
            .read()
            .expect("import binding lock poisoned")
            .clone()
            .unwrap_or_else(|| panic!("imported variable \"{}\" read while unbound", self.name))
    }

    /// `true` when the exporting side has initialised the variable (used by
    /// the fixpoint initialisation pass).
    pub fn is_source_initialised(&self) -> bool {
        self.bound().is_initialised()
    }

    /// Current raw value of the bound variable.
    pub fn value(&self) -> T {
        self.bound().value()
    }

    /// Evaluates the bound variable at `t`.
    pub fn evaluate_at(&self, t: Time) -> T {
        self.bound().evaluate_at(t)
    }
}

/// Error wiring a variable binding at composition time.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The exporting model declares no such exported variable.
    #[error("model {owner}: no exported variable \"{name}\"")]
    UnknownExport {
        /// Exporting model URI.
        owner: String,
        /// Requested variable name.
        name: String,
    },
    /// The importing model declares no such imported variable.
    #[error("model {owner}: no imported variable \"{name}\"")]
    UnknownImport {
        /// Importing model URI.
        owner: String,
        /// Requested variable name.
        name: String,
    },
    /// Exported and imported slot types disagree.
    #[error("binding {owner}.{name}: expected type {expected}, got {actual}")]
    TypeMismatch {
        /// Importing model URI.
        owner: String,
        /// Import slot name.
        name: String,
        /// Type the import slot requires.
        expected: String,
        /// Type the exporter provides.
        actual: String,
    },
    /// The import slot was bound by an earlier relation.
    #[error("model {owner}: imported variable \"{name}\" already bound")]
    AlreadyBound {
        /// Importing model URI.
        owner: String,
        /// Import slot name.
        name: String,
    },
}

trait ExportedSlotI: Send {
    fn type_name(&self) -> &'static str;
    fn clone_handle_any(&self) -> Box<dyn Any + Send>;
}

struct ExportedSlot<T> {
    handle: VariableHandle<T>,
}

impl<T: Clone + Send + Sync + 'static> ExportedSlotI for ExportedSlot<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn clone_handle_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.handle.clone())
    }
}

struct ImportSlot {
    type_name: &'static str,
    bound: bool,
    bind: Box<dyn Fn(&dyn Any) -> bool + Send>,
}

/// Explicit, statically-typed registry of a model's variable slots.
///
/// Each HIOA model registers its exported handles and imported slots by name
/// at construction; the composer wires bindings against this registry, with
/// type checks by name rather than by runtime field scanning.
pub struct VariableRegistry {
    owner_uri: String,
    exported: HashMap<String, Box<dyn ExportedSlotI>>,
    imported: HashMap<String, ImportSlot>,
}

impl VariableRegistry {
    /// Creates an empty registry for the model at `owner_uri`.
    pub fn new(owner_uri: impl Into<String>) -> Self {
        Self {
            owner_uri: owner_uri.into(),
            exported: HashMap::new(),
            imported: HashMap::new(),
        }
    }

    /// URI of the owning model.
    pub fn owner_uri(&self) -> &str {
        &self.owner_uri
    }

    /// Registers an exported variable slot.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate export name.
    pub fn register_exported<T: Clone + Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        handle: &VariableHandle<T>,
    ) {
        let name = name.into();
        let previous = self.exported.insert(
            name.clone(),
            Box::new(ExportedSlot {
                handle: handle.clone(),
            }),
        );
        assert!(
            previous.is_none(),
            "model {}: exported variable \"{name}\" registered twice",
            self.owner_uri
        );
    }

    /// Registers an imported variable slot.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate import name.
    pub fn register_imported<T: Clone + Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        slot: &ImportedVariable<T>,
    ) {
        let name = name.into();
        let slot = slot.clone();
        let previous = self.imported.insert(
            name.clone(),
            ImportSlot {
                type_name: std::any::type_name::<T>(),
                bound: false,
                bind: Box::new(move |handle: &dyn Any| {
                    match handle.downcast_ref::<VariableHandle<T>>() {
                        Some(typed) => {
                            slot.bind(typed.clone());
                            true
                        }
                        None => false,
                    }
                }),
            },
        );
        assert!(
            previous.is_none(),
            "model {}: imported variable \"{name}\" registered twice",
            self.owner_uri
        );
    }

    /// Looks up an exported slot, returning its type name and a type-erased
    /// clone of its handle for binding into importers.
    pub fn exported_handle(
        &self,
        name: &str,
    ) -> Result<(&'static str, Box<dyn Any + Send>), BindingError> {
        let slot = self
            .exported
            .get(name)
            .ok_or_else(|| BindingError::UnknownExport {
                owner: self.owner_uri.clone(),
                name: name.to_string(),
            })?;
        Ok((slot.type_name(), slot.clone_handle_any()))
    }

    /// Wires the named import slot to an exporter's type-erased handle.
    pub fn bind_import(
        &mut self,
        name: &str,
        source_type: &'static str,
        handle: &dyn Any,
    ) -> Result<(), BindingError> {
        let slot = self
            .imported
            .get_mut(name)
            .ok_or_else(|| BindingError::UnknownImport {
                owner: self.owner_uri.clone(),
                name: name.to_string(),
            })?;
        if slot.bound {
            return Err(BindingError::AlreadyBound {
                owner: self.owner_uri.clone(),
                name: name.to_string(),
            });
        }
        if !(slot.bind)(handle) {
            return Err(BindingError::TypeMismatch {
                owner: self.owner_uri.clone(),
                name: name.to_string(),
                expected: slot.type_name.to_string(),
                actual: source_type.to_string(),
            });
        }
        slot.bound = true;
        Ok(())
    }

    /// Names of import slots not yet wired, checked after composition.
    pub fn unbound_imports(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .imported
            .iter()
            .filter(|(_, slot)| !slot.bound)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
