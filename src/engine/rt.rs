//! Real-time pacing: wall-clock synchronization of the logical simulation
//! clock through an acceleration factor.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration as StdDuration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::engine::{SimulationError, simulation::Simulation};
use crate::event::EventI;
use crate::time::{Duration, Time};

/// Outcome of synchronizing to a wall-clock deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The deadline was honored.
    Synchronized,
    /// The deadline had already passed by the contained lag.
    OutOfSync(StdDuration),
}

/// Pluggable wall-clock abstraction pacing a real-time run.
///
/// Supplied by the hosting component, which decouples the engine from any
/// particular threading substrate; deadlines are expressed as offsets from
/// the agreed run start.
pub trait SimClock: Send {
    /// Anchors offset zero at `wall_start`.
    fn reset(&mut self, wall_start: Instant);

    /// Blocks until `offset` past the anchor, reporting lateness if the
    /// instant already passed.
    fn synchronize(&mut self, offset: StdDuration) -> SyncStatus;

    /// `true` once the wall clock has reached `offset` past the anchor.
    fn has_reached(&self, offset: StdDuration) -> bool;
}

/// Real wall clock: sleeps until each deadline.
#[derive(Debug, Default)]
pub struct SystemClock {
    start: Option<Instant>,
}

impl SystemClock {
    /// Creates an unanchored system clock.
    pub fn new() -> Self {
        Self::default()
    }

    fn anchor(&self) -> Instant {
        self.start.expect("clock used before reset")
    }
}

impl SimClock for SystemClock {
    fn reset(&mut self, wall_start: Instant) {
        self.start = Some(wall_start);
    }

    fn synchronize(&mut self, offset: StdDuration) -> SyncStatus {
        let deadline = self.anchor() + offset;
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
            SyncStatus::Synchronized
        } else {
            SyncStatus::OutOfSync(now - deadline)
        }
    }

    fn has_reached(&self, offset: StdDuration) -> bool {
        Instant::now() >= self.anchor() + offset
    }
}

/// No-op clock: every deadline is immediately reached, so the run executes
/// as fast as possible. Useful for tests and logical-time re-runs of
/// real-time architectures.
#[derive(Debug, Default)]
pub struct NoClock;

impl SimClock for NoClock {
    fn reset(&mut self, _wall_start: Instant) {}

    fn synchronize(&mut self, _offset: StdDuration) -> SyncStatus {
        SyncStatus::Synchronized
    }

    fn has_reached(&self, _offset: StdDuration) -> bool {
        true
    }
}

/// Sink for events the local simulation exports beyond its root, used by
/// distributed runs to hand them to the component's outbound port.
pub type EventSink = Box<dyn FnMut(Box<dyn EventI>) + Send>;

/// Drives a [`Simulation`] against wall-clock time.
///
/// Each simulated delay `D` is converted to the wall-clock delay
/// `D / acceleration` and waited out on the supplied [`SimClock`] before the
/// corresponding transitions execute. An optional inbox feeds events from
/// remote components into the tree mid-run; an optional sink carries locally
/// exported events out.
pub struct RtEngine {
    simulation: Simulation,
    acceleration: f64,
    clock: Box<dyn SimClock>,
    inbox: Option<Receiver<Box<dyn EventI>>>,
    event_sink: Option<EventSink>,
}

impl RtEngine {
    /// Poll slice used while idling for remote events.
    const IDLE_POLL: StdDuration = StdDuration::from_millis(1);

    /// Creates a real-time engine.
    ///
    /// # Errors
    ///
    /// [`SimulationError::InvalidAcceleration`] unless `acceleration > 0`.
    pub fn new(
        simulation: Simulation,
        acceleration: f64,
        clock: Box<dyn SimClock>,
    ) -> Result<Self, SimulationError> {
        if !(acceleration > 0.0) {
            return Err(SimulationError::InvalidAcceleration {
                value: acceleration,
            });
        }
        Ok(Self {
            simulation,
            acceleration,
            clock,
            inbox: None,
            event_sink: None,
        })
    }

    /// Attaches an inbox delivering remote events mid-run.
    pub fn with_inbox(mut self, inbox: Receiver<Box<dyn EventI>>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Attaches a sink for events exported at the local root.
    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Runs for `duration` of simulated time starting at the wall-clock
    /// instant `wall_start` and simulated instant `sim_start`.
    ///
    /// The engine waits out the full run window even when no event remains
    /// scheduled, since remote events may still arrive; there is no mid-run
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Fails on an infinite duration or a fixpoint initialisation deadlock.
    pub fn run(
        &mut self,
        wall_start: Instant,
        sim_start: Time,
        duration: Duration,
    ) -> Result<(), SimulationError> {
        if duration.is_infinite() {
            return Err(SimulationError::InfiniteRtDuration);
        }
        let end = sim_start.add(duration);
        let window = duration.to_wall_clock(self.acceleration);
        info!(
            %sim_start,
            %end,
            acceleration = self.acceleration,
            "real-time simulation starting"
        );
        self.simulation.initialise(sim_start)?;
        self.clock.reset(wall_start);
        loop {
            self.drain_inbox();
            let t = self.simulation.time_of_next_event();
            if t.is_infinite() || end.is_before(t) {
                if !self.wait_for_remote_event(window) {
                    break;
                }
                continue;
            }
            let offset = t.sub(sim_start).to_wall_clock(self.acceleration);
            if let SyncStatus::OutOfSync(lag) = self.clock.synchronize(offset) {
                warn!(?lag, at = %t, "real-time pacing fell behind the wall clock");
            }
            // Events that arrived while waiting may be due before t.
            self.drain_inbox();
            let due = self.simulation.time_of_next_event().min(t);
            let exported = self.simulation.step_at(due);
            self.forward_exports(exported);
        }
        // Wait out the remainder of the agreed window before reporting.
        self.clock.synchronize(window);
        self.simulation.end(end);
        info!(%end, "real-time simulation finished");
        Ok(())
    }

    /// Runs starting at the agreed Unix-epoch instant, the barrier all
    /// distributed components release on.
    ///
    /// A start instant already in the past is honored immediately with a
    /// warning; all components then share the same lateness.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`RtEngine::run`].
    pub fn run_at_unix_epoch(
        &mut self,
        epoch_start_millis: u64,
        sim_start: Time,
        duration: Duration,
    ) -> Result<(), SimulationError> {
        let target = UNIX_EPOCH + StdDuration::from_millis(epoch_start_millis);
        let wall_start = match target.duration_since(SystemTime::now()) {
            Ok(lead) => Instant::now() + lead,
            Err(_) => {
                warn!(epoch_start_millis, "agreed start instant already passed, starting now");
                Instant::now()
            }
        };
        self.run(wall_start, sim_start, duration)
    }

    /// Consumes the engine, returning the simulation for report retrieval.
    pub fn into_simulation(self) -> Simulation {
        self.simulation
    }

    fn drain_inbox(&mut self) {
        let Some(inbox) = &self.inbox else { return };
        loop {
            match inbox.try_recv() {
                Ok(event) => {
                    debug!(kind = event.kind(), "remote event received");
                    self.simulation.store_external_event(event);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Idles until a remote event arrives or the run window closes; returns
    /// `false` when the window is over or no event source remains.
    fn wait_for_remote_event(&mut self, window: StdDuration) -> bool {
        let Some(inbox) = &self.inbox else {
            return false;
        };
        loop {
            if self.clock.has_reached(window) {
                return false;
            }
            match inbox.recv_timeout(Self::IDLE_POLL) {
                Ok(event) => {
                    self.simulation.store_external_event(event);
                    return true;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn forward_exports(&mut self, exported: Vec<Box<dyn EventI>>) {
        if exported.is_empty() {
            return;
        }
        match &mut self.event_sink {
            Some(sink) => {
                for event in exported {
                    sink(event);
                }
            }
            None => debug!(
                count = exported.len(),
                "events exported at the local root with no sink, dropped"
            ),
        }
    }
}
