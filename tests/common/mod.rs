//! Shared test fixtures for integration tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};

use hem_sim::config::{ActionConfig, ScenarioConfig};
use hem_sim::engine::{SimClock, SyncStatus};

/// One simulated hour in minutes, sampled every 5 minutes, with a short
/// lamp session.
pub fn short_config() -> ScenarioConfig {
    let mut config = ScenarioConfig::baseline();
    config.simulation.end = 60.0;
    config.simulation.seed = 7;
    config.lamp.schedule = vec![
        ActionConfig {
            at: 10.0,
            command: "switch_on".into(),
        },
        ActionConfig {
            at: 50.0,
            command: "switch_off".into(),
        },
    ];
    config
}

/// Fake wall clock that records every requested deadline and never sleeps.
#[derive(Clone, Default)]
pub struct RecordingClock {
    pub offsets: Arc<Mutex<Vec<StdDuration>>>,
}

impl RecordingClock {
    pub fn recorded(&self) -> Vec<StdDuration> {
        self.offsets.lock().expect("clock lock poisoned").clone()
    }
}

impl SimClock for RecordingClock {
    fn reset(&mut self, _wall_start: Instant) {}

    fn synchronize(&mut self, offset: StdDuration) -> SyncStatus {
        self.offsets
            .lock()
            .expect("clock lock poisoned")
            .push(offset);
        SyncStatus::Synchronized
    }

    fn has_reached(&self, _offset: StdDuration) -> bool {
        true
    }
}
