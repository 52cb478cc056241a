//! Subscribes to process signals and translates them into lifecycle events.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;

use thiserror::Error;
use tracing::{debug, info};

use crate::controller::ControlEvent;

pub(crate) const SIGNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signal");

/// Signal delivery is process-wide state; exactly one coordinator may own
/// it at a time.
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Logical lifecycle request distilled from process signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Stop the run and execute the shutdown sequence.
    Terminate,
    /// Surface a reload request to the service; the run continues.
    Reload,
}

/// Errors surfaced while subscribing to process signals.
#[derive(Debug, Error)]
pub enum SignalError {
    /// A coordinator is already installed for this process.
    #[error("signal coordinator already installed for this process")]
    AlreadyInstalled,
    /// Registering the signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Delivery channel handed to a [`SignalInstaller`].
///
/// Events delivered before the controller starts blocking are queued and
/// observed later; events delivered after the run has ended are dropped.
#[derive(Debug, Clone)]
pub struct SignalSink {
    events: Sender<ControlEvent>,
}

impl SignalSink {
    pub(crate) fn new(events: Sender<ControlEvent>) -> Self {
        Self { events }
    }

    /// Forwards one signal event to the controller.
    pub fn deliver(&self, event: SignalEvent) {
        if self.events.send(ControlEvent::Signal(event)).is_err() {
            debug!(
                target: SIGNAL_TARGET,
                ?event,
                "controller gone; dropping signal event"
            );
        }
    }
}

/// Abstraction over signal subscription strategies.
pub trait SignalInstaller: Send + Sync {
    /// Installs handlers and begins forwarding events into `sink`.
    ///
    /// The returned guard tears the subscription down when dropped.
    fn install(&self, sink: SignalSink) -> Result<SignalGuard, SignalError>;
}

/// Installer that subscribes to the process termination and reload signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignals;

impl SystemSignals {
    /// Builds the system installer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl SignalInstaller for SystemSignals {
    fn install(&self, sink: SignalSink) -> Result<SignalGuard, SignalError> {
        use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
        use signal_hook::iterator::Signals;

        register()?;
        let mut signals = match Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP]) {
            Ok(signals) => signals,
            Err(source) => {
                INSTALLED.store(false, Ordering::SeqCst);
                return Err(SignalError::Install { source });
            }
        };
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            for signal in signals.forever() {
                let event = match signal {
                    SIGHUP => SignalEvent::Reload,
                    _ => SignalEvent::Terminate,
                };
                info!(target: SIGNAL_TARGET, signal, ?event, "signal received");
                sink.deliver(event);
            }
        });
        info!(target: SIGNAL_TARGET, "signal coordinator installed");
        Ok(SignalGuard {
            handle: Some(handle),
            thread: Some(thread),
            registered: true,
        })
    }
}

#[cfg(not(unix))]
impl SignalInstaller for SystemSignals {
    fn install(&self, _sink: SignalSink) -> Result<SignalGuard, SignalError> {
        // No platform signal source: the run can still stop through a
        // fatal tick error.
        register()?;
        Ok(SignalGuard {
            thread: None,
            registered: true,
        })
    }
}

fn register() -> Result<(), SignalError> {
    if INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(SignalError::AlreadyInstalled);
    }
    Ok(())
}

/// Releases the process-wide signal registration when dropped.
#[derive(Debug)]
pub struct SignalGuard {
    #[cfg(unix)]
    handle: Option<signal_hook::iterator::Handle>,
    thread: Option<thread::JoinHandle<()>>,
    registered: bool,
}

impl SignalGuard {
    /// Guard that owns no process-wide state.
    ///
    /// For installers that do not touch platform signal delivery, such as
    /// test doubles driving a [`SignalSink`] by hand.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            #[cfg(unix)]
            handle: None,
            thread: None,
            registered: false,
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            debug!(target: SIGNAL_TARGET, "signal forwarding thread panicked");
        }
        if self.registered {
            INSTALLED.store(false, Ordering::SeqCst);
            debug!(target: SIGNAL_TARGET, "signal coordinator released");
        }
    }
}
