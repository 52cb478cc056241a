//! Test doubles shared by the controller tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::controller::LifecycleState;
use crate::observer::LifecycleObserver;
use crate::options::Options;
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::service::{RunTick, Service, ServiceError};
use crate::signal::{SignalError, SignalEvent, SignalGuard, SignalInstaller, SignalSink};

pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `probe` until it returns `true` or the timeout elapses.
pub(crate) fn wait_until(probe: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    false
}

/// Service double counting hook invocations, with per-hook failure switches.
#[derive(Clone, Default)]
pub(crate) struct RecordingService {
    inits: Arc<AtomicUsize>,
    ticks: Arc<AtomicUsize>,
    reloads: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    fail_init: bool,
    fail_tick: bool,
    fail_shutdown: bool,
}

impl RecordingService {
    pub(crate) fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_tick() -> Self {
        Self {
            fail_tick: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_shutdown() -> Self {
        Self {
            fail_shutdown: true,
            ..Self::default()
        }
    }

    pub(crate) fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub(crate) fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub(crate) fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Service for RecordingService {
    fn on_init(&self) -> Result<(), ServiceError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err("init rejected".into());
        }
        Ok(())
    }

    fn on_tick(&self, _tick: &RunTick) -> Result<(), ServiceError> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if self.fail_tick {
            return Err("tick rejected".into());
        }
        Ok(())
    }

    fn on_reload(&self) -> Result<(), ServiceError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_shutdown(&self) -> Result<(), ServiceError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            return Err("shutdown rejected".into());
        }
        Ok(())
    }
}

/// Daemonizer double that records invocations without forking.
#[derive(Clone, Default)]
pub(crate) struct InertDaemonizer {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl InertDaemonizer {
    pub(crate) fn unsupported() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for InertDaemonizer {
    fn daemonize(&self, _options: &Options) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DaemonizeError::Unsupported);
        }
        Ok(())
    }
}

/// Installer double that hands the sink back to the test for manual
/// triggering, optionally delivering queued events at install time.
#[derive(Clone, Default)]
pub(crate) struct ManualSignals {
    sink: Arc<Mutex<Option<SignalSink>>>,
    pretrigger: Vec<SignalEvent>,
}

impl ManualSignals {
    pub(crate) fn pretriggered(events: Vec<SignalEvent>) -> Self {
        Self {
            pretrigger: events,
            ..Self::default()
        }
    }

    /// Delivers `event` once the controller has installed the coordinator.
    pub(crate) fn trigger(&self, event: SignalEvent) {
        assert!(
            wait_until(|| self.try_trigger(event)),
            "signal coordinator was never installed"
        );
    }

    fn try_trigger(&self, event: SignalEvent) -> bool {
        match &*self.sink.lock().expect("sink mutex poisoned") {
            Some(sink) => {
                sink.deliver(event);
                true
            }
            None => false,
        }
    }
}

impl SignalInstaller for ManualSignals {
    fn install(&self, sink: SignalSink) -> Result<SignalGuard, SignalError> {
        for event in &self.pretrigger {
            sink.deliver(*event);
        }
        *self.sink.lock().expect("sink mutex poisoned") = Some(sink);
        Ok(SignalGuard::inert())
    }
}

/// Observer double recording the event stream.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    states: Mutex<Vec<LifecycleState>>,
    skips: Mutex<Vec<(u64, u64)>>,
    reloads: AtomicUsize,
}

impl RecordingObserver {
    pub(crate) fn states(&self) -> Vec<LifecycleState> {
        self.states.lock().expect("state mutex poisoned").clone()
    }

    pub(crate) fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl LifecycleObserver for RecordingObserver {
    fn state_changed(&self, state: LifecycleState) {
        self.states
            .lock()
            .expect("state mutex poisoned")
            .push(state);
    }

    fn ticks_skipped(&self, after: u64, missed: u64) {
        self.skips
            .lock()
            .expect("skip mutex poisoned")
            .push((after, missed));
    }

    fn reload_requested(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}
