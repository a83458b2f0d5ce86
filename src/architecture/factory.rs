//! Registry mapping descriptor class names to model constructors.

use std::collections::HashMap;

use crate::architecture::descriptor::AtomicModelDescriptor;
use crate::architecture::ArchitectureError;
use crate::model::AtomicModelI;
use crate::time::TimeUnit;

/// Constructor for one atomic model class.
///
/// Implemented for free by any matching closure, so registration reads
/// `factories.register("Lamp", |d, unit| Ok(Box::new(LampModel::new(&d.uri, unit))))`.
pub trait AtomicModelFactoryI: Send + Sync {
    /// Builds a model instance for `descriptor`, using `time_unit` as the
    /// simulation time unit. The returned model's URI must equal
    /// `descriptor.uri`.
    fn create(
        &self,
        descriptor: &AtomicModelDescriptor,
        time_unit: TimeUnit,
    ) -> Result<Box<dyn AtomicModelI>, ArchitectureError>;
}

impl<F> AtomicModelFactoryI for F
where
    F: Fn(&AtomicModelDescriptor, TimeUnit) -> Result<Box<dyn AtomicModelI>, ArchitectureError>
        + Send
        + Sync,
{
    fn create(
        &self,
        descriptor: &AtomicModelDescriptor,
        time_unit: TimeUnit,
    ) -> Result<Box<dyn AtomicModelI>, ArchitectureError> {
        self(descriptor, time_unit)
    }
}

/// Class-name-keyed factory registry used by the composer.
#[derive(Default)]
pub struct ModelFactories {
    factories: HashMap<String, Box<dyn AtomicModelFactoryI>>,
}

impl ModelFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `class`, replacing any previous entry.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(&AtomicModelDescriptor, TimeUnit) -> Result<Box<dyn AtomicModelI>, ArchitectureError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(class.into(), Box::new(factory));
    }

    /// Factory registered for `class`, if any.
    pub fn get(&self, class: &str) -> Option<&dyn AtomicModelFactoryI> {
        self.factories.get(class).map(|f| f.as_ref())
    }
}
