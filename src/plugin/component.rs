//! Component plugin hosting one subtree of a distributed run.

use std::mem;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::architecture::{Architecture, ModelFactories};
use crate::engine::{RtEngine, Simulation, SimulationError, SimulationReport, SystemClock};
use crate::event::EventI;
use crate::model::RunParameters;
use crate::plugin::{EventExchangePortI, PluginError, SimulatorPluginI};
use crate::time::{Duration, Time};

enum PluginState {
    Idle,
    Constructed(Simulation),
    Running {
        worker: JoinHandle<(Result<(), SimulationError>, Simulation)>,
        inbox: Sender<Box<dyn EventI>>,
    },
    Finished(Simulation),
    Failed,
}

impl PluginState {
    fn name(&self) -> &'static str {
        match self {
            PluginState::Idle => "idle",
            PluginState::Constructed(_) => "constructed",
            PluginState::Running { .. } => "running",
            PluginState::Finished(_) => "finished",
            PluginState::Failed => "failed",
        }
    }
}

/// Hosts one component's architecture and drives it in real time on a
/// worker thread.
///
/// Events exported at the component's root are pushed to the `uplink` port;
/// events from peer components arrive via [`SimulatorPluginI::deliver_event`]
/// and are fed into the running engine's inbox.
pub struct AtomicSimulatorPlugin {
    uri: String,
    architecture: Architecture,
    factories: ModelFactories,
    acceleration: f64,
    uplink: Option<Arc<dyn EventExchangePortI>>,
    state: PluginState,
}

impl AtomicSimulatorPlugin {
    /// Creates an idle component for `architecture`, paced at
    /// `acceleration` times wall-clock speed once started.
    ///
    /// # Panics
    ///
    /// Panics if `acceleration` is not a positive finite number.
    pub fn new(architecture: Architecture, factories: ModelFactories, acceleration: f64) -> Self {
        assert!(
            acceleration.is_finite() && acceleration > 0.0,
            "acceleration must be finite and > 0, got {acceleration}"
        );
        Self {
            uri: architecture.root_uri().to_string(),
            architecture,
            factories,
            acceleration,
            uplink: None,
            state: PluginState::Idle,
        }
    }

    /// Attaches the port receiving events this component exports.
    pub fn set_uplink(&mut self, uplink: Arc<dyn EventExchangePortI>) {
        self.uplink = Some(uplink);
    }

    fn invalid_state(&self, operation: &'static str) -> PluginError {
        PluginError::InvalidState {
            uri: self.uri.clone(),
            operation,
            state: self.state.name(),
        }
    }
}

impl SimulatorPluginI for AtomicSimulatorPlugin {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn construct_simulator(&mut self) -> Result<(), PluginError> {
        if !matches!(self.state, PluginState::Idle) {
            return Err(self.invalid_state("construct_simulator"));
        }
        let simulation = self
            .architecture
            .construct_simulator(&self.factories, &RunParameters::default())
            .map_err(|errors| PluginError::Architecture {
                uri: self.uri.clone(),
                errors,
            })?;
        info!(component = %self.uri, "local simulator composed");
        self.state = PluginState::Constructed(simulation);
        Ok(())
    }

    fn set_run_parameters(&mut self, params: &RunParameters) -> Result<(), PluginError> {
        let PluginState::Constructed(simulation) = &mut self.state else {
            return Err(self.invalid_state("set_run_parameters"));
        };
        simulation.set_run_parameters(params)?;
        Ok(())
    }

    fn start_simulation(
        &mut self,
        epoch_start_millis: u64,
        sim_start: Time,
        duration: Duration,
    ) -> Result<(), PluginError> {
        if !matches!(self.state, PluginState::Constructed(_)) {
            return Err(self.invalid_state("start_simulation"));
        }
        let PluginState::Constructed(simulation) =
            mem::replace(&mut self.state, PluginState::Failed)
        else {
            unreachable!()
        };

        let (tx, rx) = mpsc::channel();
        let mut engine = RtEngine::new(simulation, self.acceleration, Box::new(SystemClock::new()))?
            .with_inbox(rx);
        if let Some(uplink) = &self.uplink {
            let uplink = Arc::clone(uplink);
            let source = self.uri.clone();
            engine = engine.with_event_sink(Box::new(move |event| {
                if let Err(e) = uplink.deliver_event(&source, event) {
                    warn!(component = %source, error = %e, "uplink delivery failed");
                }
            }));
        }

        info!(
            component = %self.uri,
            epoch_start_millis,
            start = %sim_start,
            "starting real-time run"
        );
        let worker = std::thread::spawn(move || {
            let result = engine.run_at_unix_epoch(epoch_start_millis, sim_start, duration);
            (result, engine.into_simulation())
        });
        self.state = PluginState::Running { worker, inbox: tx };
        Ok(())
    }

    fn deliver_event(&mut self, source: &str, event: Box<dyn EventI>) -> Result<(), PluginError> {
        match &self.state {
            PluginState::Running { inbox, .. } => {
                if inbox.send(event).is_err() {
                    // The worker stopped between its final step and our join;
                    // a late event is dropped, not an error.
                    debug!(component = %self.uri, from = source, "event arrived after run end");
                }
                Ok(())
            }
            PluginState::Finished(_) => {
                debug!(component = %self.uri, from = source, "event arrived after run end");
                Ok(())
            }
            _ => Err(PluginError::NotRunning {
                uri: self.uri.clone(),
            }),
        }
    }

    fn poll_completion(&mut self) -> Result<bool, PluginError> {
        match &self.state {
            PluginState::Running { worker, .. } if !worker.is_finished() => return Ok(false),
            PluginState::Running { .. } => {}
            PluginState::Finished(_) => return Ok(true),
            _ => return Err(self.invalid_state("poll_completion")),
        }
        let PluginState::Running { worker, .. } =
            mem::replace(&mut self.state, PluginState::Failed)
        else {
            unreachable!()
        };
        let (result, simulation) = worker.join().map_err(|_| PluginError::WorkerPanicked {
            uri: self.uri.clone(),
        })?;
        self.state = PluginState::Finished(simulation);
        result?;
        Ok(true)
    }

    fn final_report(&mut self) -> Result<SimulationReport, PluginError> {
        let PluginState::Finished(simulation) = &self.state else {
            return Err(self.invalid_state("final_report"));
        };
        Ok(simulation.final_report())
    }
}
