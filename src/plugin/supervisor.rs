//! Supervisor driving the shared lifecycle of a distributed run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use tracing::{error, info};

use crate::engine::SimulationReport;
use crate::model::RunParameters;
use crate::plugin::{PluginError, SimulationManagementPortI};
use crate::time::{Duration, Time};

/// Drives every component of a distributed run through one lifecycle:
/// construct, parameterize, start at a shared wall-clock instant, wait,
/// collect reports.
///
/// The first failure at any step aborts the whole run and is returned
/// unchanged.
pub struct SupervisorPlugin {
    components: Vec<Arc<dyn SimulationManagementPortI>>,
    start_lead: StdDuration,
}

impl SupervisorPlugin {
    /// Creates a supervisor that schedules the shared start `start_lead`
    /// after the last component was told to start, leaving each component
    /// time to arm its clock.
    pub fn new(start_lead: StdDuration) -> Self {
        Self {
            components: Vec::new(),
            start_lead,
        }
    }

    /// Registers a component's management port.
    pub fn add_component(&mut self, port: Arc<dyn SimulationManagementPortI>) {
        self.components.push(port);
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Runs the full distributed lifecycle, returning one final report per
    /// component in registration order.
    ///
    /// `params` maps component root URIs to their run-parameter sets;
    /// components without an entry run with their configured defaults.
    ///
    /// # Errors
    ///
    /// Returns the first [`PluginError`] raised by any component at any
    /// step; later components are not started once a step fails.
    pub fn run(
        &self,
        params: &HashMap<String, RunParameters>,
        sim_start: Time,
        duration: Duration,
    ) -> Result<Vec<SimulationReport>, PluginError> {
        for component in &self.components {
            component.construct_simulator().inspect_err(|e| {
                error!(component = %component.uri(), error = %e, "construction failed, run aborted");
            })?;
        }
        for component in &self.components {
            if let Some(overrides) = params.get(&component.uri()) {
                component.set_run_parameters(overrides).inspect_err(|e| {
                    error!(component = %component.uri(), error = %e, "run parameters rejected, run aborted");
                })?;
            }
        }

        let epoch_start = SystemTime::now() + self.start_lead;
        let epoch_start_millis = epoch_start
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as u64;
        info!(
            components = self.components.len(),
            epoch_start_millis,
            start = %sim_start,
            "starting distributed run"
        );
        for component in &self.components {
            component
                .start_simulation(epoch_start_millis, sim_start, duration)
                .inspect_err(|e| {
                    error!(component = %component.uri(), error = %e, "start failed, run aborted");
                })?;
        }

        for component in &self.components {
            component.wait_for_completion().inspect_err(|e| {
                error!(component = %component.uri(), error = %e, "run failed");
            })?;
        }
        let reports = self
            .components
            .iter()
            .map(|c| c.final_report())
            .collect::<Result<Vec<_>, _>>()?;
        info!(components = reports.len(), "distributed run complete");
        Ok(reports)
    }
}
