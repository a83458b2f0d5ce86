//! Inter-component event routing for distributed runs.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::event::EventI;
use crate::plugin::{EventExchangePortI, PluginError};

/// One inter-component route: events of `kind` exported by the component
/// rooted at `source` go to the named sink components.
#[derive(Debug, Clone)]
pub struct InterComponentRoute {
    pub source: String,
    pub kind: String,
    pub sinks: Vec<String>,
}

/// Routes events between components of one distributed run.
///
/// The coordinator is itself an [`EventExchangePortI`]: every component's
/// uplink points here, and the coordinator fans each event out to the sink
/// components' own event ports. Events with no route are dropped, mirroring
/// how an in-process coupled model drops unrouted exports.
pub struct CoordinatorPlugin {
    ports: HashMap<String, Arc<dyn EventExchangePortI>>,
    routes: HashMap<(String, String), Vec<String>>,
}

impl CoordinatorPlugin {
    pub fn new() -> Self {
        Self {
            ports: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Registers the event port of the component rooted at `uri`.
    ///
    /// # Panics
    ///
    /// Panics if a port is already registered under `uri`.
    pub fn register_component(&mut self, uri: impl Into<String>, port: Arc<dyn EventExchangePortI>) {
        let uri = uri.into();
        let previous = self.ports.insert(uri.clone(), port);
        assert!(previous.is_none(), "component {uri} registered twice");
    }

    /// Adds a route; several routes may share a source and kind.
    ///
    /// # Panics
    ///
    /// Panics if a sink names the source component, which would echo the
    /// event straight back.
    pub fn add_route(&mut self, route: InterComponentRoute) {
        assert!(
            !route.sinks.contains(&route.source),
            "route for {}/{} loops back to its source",
            route.source,
            route.kind
        );
        self.routes
            .entry((route.source, route.kind))
            .or_default()
            .extend(route.sinks);
    }
}

impl Default for CoordinatorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl EventExchangePortI for CoordinatorPlugin {
    fn deliver_event(&self, source: &str, event: Box<dyn EventI>) -> Result<(), PluginError> {
        let key = (source.to_string(), event.kind().to_string());
        let Some(sinks) = self.routes.get(&key) else {
            debug!(from = source, kind = event.kind(), "inter-component event has no route, dropped");
            return Ok(());
        };
        for sink in sinks {
            let port = self
                .ports
                .get(sink)
                .ok_or_else(|| PluginError::Disconnected { uri: sink.clone() })?;
            trace!(from = source, to = %sink, kind = event.kind(), "inter-component event routed");
            port.deliver_event(source, event.clone())?;
        }
        Ok(())
    }
}
