//! Caller-supplied hooks driven through the process lifecycle.

use std::error::Error;
use std::time::SystemTime;

/// Boxed error returned by service hooks.
pub type ServiceError = Box<dyn Error + Send + Sync + 'static>;

/// One scheduled invocation of the periodic callback.
#[derive(Debug, Clone, Copy)]
pub struct RunTick {
    sequence: u64,
    started_at: SystemTime,
}

impl RunTick {
    pub(crate) fn new(sequence: u64) -> Self {
        Self {
            sequence,
            started_at: SystemTime::now(),
        }
    }

    /// Position of this tick within the run, starting at 1.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wall-clock instant at which the tick was dispatched.
    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }
}

/// Hooks the controller drives through the process lifecycle.
///
/// [`on_tick`](Self::on_tick) carries the periodic workload; the remaining
/// hooks default to no-ops. All hooks take `&self` because the controller
/// shares the service between its own thread and the scheduler thread, so
/// mutable state belongs behind interior mutability.
pub trait Service: Send + Sync + 'static {
    /// Invoked once, before daemonization and scheduling start. A failure
    /// aborts the run before any side effect beyond the hook itself.
    fn on_init(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Invoked once per elapsed interval. An error stops the run; retry
    /// policy belongs inside the hook.
    fn on_tick(&self, tick: &RunTick) -> Result<(), ServiceError>;

    /// Invoked when a reload request arrives. Errors are logged and the run
    /// continues; reload semantics are the caller's responsibility.
    fn on_reload(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Invoked once during shutdown, after the scheduler has drained. An
    /// error is recorded in the exit code but never blocks teardown.
    fn on_shutdown(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
