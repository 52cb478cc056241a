//! Lifecycle harness for long-running command-line services.
//!
//! The crate owns the process lifecycle of a periodic service: validating
//! caller-supplied [`Options`], optionally detaching into the background,
//! installing signal handling, driving the [`Service`] tick callback on a
//! fixed interval, and sequencing a clean shutdown however the process is
//! asked to stop. Argument parsing, log formats, and configuration-file
//! loading remain the caller's concern: the controller consumes a fully
//! resolved [`Options`] value and a [`Service`] implementation, nothing
//! more.
//!
//! Stops are cooperative throughout. A termination request is observed
//! between ticks, never inside one; an in-flight tick always runs to
//! completion before the shutdown hook fires and the pidfile is released.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use arbiter::{Options, RunTick, Service, ServiceError};
//!
//! struct Heartbeat;
//!
//! impl Service for Heartbeat {
//!     fn on_tick(&self, tick: &RunTick) -> Result<(), ServiceError> {
//!         tracing::info!(sequence = tick.sequence(), "beat");
//!         Ok(())
//!     }
//! }
//!
//! let options = Options::new(Duration::from_secs(10))
//!     .with_daemon(true)
//!     .with_pidfile("/run/heartbeat.pid");
//! std::process::exit(arbiter::run(options, Heartbeat).code().into());
//! ```

mod controller;
mod errors;
mod observer;
mod options;
mod process;
mod scheduler;
mod service;
mod signal;
pub mod telemetry;

pub use controller::{LifecycleState, run, run_with};
pub use errors::{ExitCode, RunError};
pub use observer::{LifecycleObserver, StructuredObserver};
pub use options::{Identity, Options, OptionsError};
pub use process::daemonizer::{DaemonizeError, Daemonizer, SystemDaemonizer};
pub use process::guard::PidFileError;
pub use process::identity::IdentityError;
pub use service::{RunTick, Service, ServiceError};
pub use signal::{
    SignalError, SignalEvent, SignalGuard, SignalInstaller, SignalSink, SystemSignals,
};

#[cfg(test)]
mod tests;
