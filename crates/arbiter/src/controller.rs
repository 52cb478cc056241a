//! Sequences the process lifecycle from validation through shutdown.

use std::sync::Arc;
use std::sync::mpsc;

use tracing::{debug, error, info, warn};

use crate::errors::{ExitCode, RunError};
use crate::observer::{LifecycleObserver, StructuredObserver};
use crate::options::Options;
use crate::process::daemonizer::{Daemonizer, SystemDaemonizer};
use crate::process::guard::PidFile;
use crate::process::identity;
use crate::scheduler::{self, Cadence};
use crate::service::{Service, ServiceError};
use crate::signal::{SignalEvent, SignalInstaller, SignalSink, SystemSignals};
use crate::telemetry;

pub(crate) const RUN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Phase of a single controller run.
///
/// Transitions are monotonic: no state is ever revisited, and
/// `Daemonizing` is skipped entirely in foreground mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// The controller exists but has not validated anything yet.
    Created,
    /// Options validated; the initialization hook is running.
    Initializing,
    /// The process is detaching into the background.
    Daemonizing,
    /// The scheduler is driving the periodic hook.
    Running,
    /// A stop was requested; the run is draining.
    ShuttingDown,
    /// The run has completed and all records are released.
    Stopped,
}

impl LifecycleState {
    /// Stable lower-case name for logs and snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Daemonizing => "daemonizing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
        }
    }
}

/// Events consumed by the controller's blocking loop.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    /// A signal-coordinator event.
    Signal(SignalEvent),
    /// The scheduler stopped because the periodic hook failed.
    TickFailed(ServiceError),
}

/// Tracks the monotonic state machine and reports transitions.
struct Lifecycle {
    state: LifecycleState,
    observer: Arc<dyn LifecycleObserver>,
}

impl Lifecycle {
    fn new(observer: Arc<dyn LifecycleObserver>) -> Self {
        Self {
            state: LifecycleState::Created,
            observer,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        debug_assert!(next > self.state, "lifecycle states are never revisited");
        self.state = next;
        self.observer.state_changed(next);
    }
}

/// Runs `service` through the full lifecycle with the system collaborators.
///
/// Blocks until a termination request arrives or the service reports a
/// fatal error, completes the shutdown sequence, and reports the resulting
/// exit code. Telemetry is initialised on entry; a subscriber installed by
/// the caller beforehand keeps precedence.
pub fn run<S>(options: Options, service: S) -> ExitCode
where
    S: Service,
{
    if let Err(source) = telemetry::initialise() {
        debug!(target: RUN_TARGET, error = %source, "telemetry initialisation skipped");
    }
    match run_with(
        options,
        service,
        SystemDaemonizer::new(),
        SystemSignals::new(),
        Arc::new(StructuredObserver::new()),
    ) {
        Ok(()) => ExitCode::Clean,
        Err(source) => {
            error!(
                target: RUN_TARGET,
                error = %source,
                code = source.exit_code().code(),
                "run failed"
            );
            source.exit_code()
        }
    }
}

/// Runs the lifecycle with injected process-level collaborators.
///
/// The production entry point is [`run`]; this seam lets embedders and
/// tests drive the full sequence without forking the process or touching
/// platform signal delivery.
pub fn run_with<S, D, G>(
    options: Options,
    service: S,
    daemonizer: D,
    signals: G,
    observer: Arc<dyn LifecycleObserver>,
) -> Result<(), RunError>
where
    S: Service,
    D: Daemonizer,
    G: SignalInstaller,
{
    let identity = options.validate()?;
    let mut lifecycle = Lifecycle::new(Arc::clone(&observer));
    lifecycle.advance(LifecycleState::Initializing);
    info!(
        target: RUN_TARGET,
        interval = ?options.interval(),
        daemon = options.daemon(),
        "starting run"
    );
    service
        .on_init()
        .map_err(|source| RunError::Init { source })?;

    // The pidfile is claimed before detaching so a conflict surfaces on the
    // invoking terminal, and committed with the post-fork pid afterwards.
    let mut pidfile = None;
    if options.daemon() {
        lifecycle.advance(LifecycleState::Daemonizing);
        if let Some(path) = options.pidfile() {
            pidfile = Some(PidFile::claim(path)?);
        }
        daemonizer.daemonize(&options)?;
        if let Some(record) = pidfile.as_ref() {
            record.commit(std::process::id())?;
            record.apply_ownership(&identity)?;
        }
    }

    let (events_tx, events_rx) = mpsc::channel();
    let signal_guard = signals.install(SignalSink::new(events_tx.clone()))?;

    // Privileged setup (pidfile, log sink) is done; from here the process
    // runs as the requested identity.
    identity::apply(&identity)?;

    lifecycle.advance(LifecycleState::Running);
    let service = Arc::new(service);
    let ticker = scheduler::start(
        Arc::clone(&service),
        Cadence {
            interval: options.interval(),
            immediate_first: options.immediate_first_tick(),
        },
        events_tx,
        Arc::clone(&observer),
    );

    let mut failure: Option<RunError> = None;
    loop {
        match events_rx.recv() {
            Ok(ControlEvent::Signal(SignalEvent::Terminate)) => {
                info!(target: RUN_TARGET, "termination requested");
                break;
            }
            Ok(ControlEvent::Signal(SignalEvent::Reload)) => {
                observer.reload_requested();
                if let Err(source) = service.on_reload() {
                    warn!(target: RUN_TARGET, error = %source, "reload hook failed");
                }
            }
            Ok(ControlEvent::TickFailed(source)) => {
                failure = Some(RunError::Tick { source });
                break;
            }
            // Every sender is gone: the scheduler exited and the signal
            // source was torn down, so nothing further can arrive.
            Err(mpsc::RecvError) => break,
        }
    }

    lifecycle.advance(LifecycleState::ShuttingDown);
    ticker.stop();
    if ticker.join().is_err() && failure.is_none() {
        failure = Some(RunError::TickPanic);
    }
    if let Err(source) = service.on_shutdown() {
        warn!(target: RUN_TARGET, error = %source, "shutdown hook failed");
        if failure.is_none() {
            failure = Some(RunError::Shutdown { source });
        }
    }
    // Removing the pidfile and releasing the signal registration must
    // happen even when a hook failed.
    drop(pidfile);
    drop(signal_guard);
    lifecycle.advance(LifecycleState::Stopped);
    info!(target: RUN_TARGET, clean = failure.is_none(), "run stopped");
    match failure {
        None => Ok(()),
        Some(source) => Err(source),
    }
}
