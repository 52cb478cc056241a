//! Observer surface for lifecycle events.

use std::sync::Arc;

use crate::controller::LifecycleState;

/// Observer trait used to surface lifecycle events to telemetry sinks.
///
/// The controller and the scheduler report through this trait rather than
/// logging directly, so callers can capture the event stream (dashboards,
/// tests) without parsing log output.
pub trait LifecycleObserver: Send + Sync {
    /// Invoked after every lifecycle state transition.
    fn state_changed(&self, state: LifecycleState);

    /// Invoked when one or more tick slots were skipped because the tick
    /// with the given sequence number overran its interval.
    fn ticks_skipped(&self, after: u64, missed: u64);

    /// Invoked when a reload request arrives, before the reload hook runs.
    fn reload_requested(&self);
}

impl<T> LifecycleObserver for Arc<T>
where
    T: LifecycleObserver,
{
    fn state_changed(&self, state: LifecycleState) {
        (**self).state_changed(state);
    }

    fn ticks_skipped(&self, after: u64, missed: u64) {
        (**self).ticks_skipped(after, missed);
    }

    fn reload_requested(&self) {
        (**self).reload_requested();
    }
}

/// Default observer that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredObserver;

impl StructuredObserver {
    /// Builds a new observer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LifecycleObserver for StructuredObserver {
    fn state_changed(&self, state: LifecycleState) {
        tracing::info!(
            target: "arbiter::lifecycle",
            event = "state_changed",
            state = state.as_str(),
            "lifecycle state changed"
        );
    }

    fn ticks_skipped(&self, after: u64, missed: u64) {
        tracing::warn!(
            target: "arbiter::lifecycle",
            event = "ticks_skipped",
            after,
            missed,
            "tick overran its interval; skipping missed slots"
        );
    }

    fn reload_requested(&self) {
        tracing::info!(
            target: "arbiter::lifecycle",
            event = "reload_requested",
            "reload requested"
        );
    }
}
