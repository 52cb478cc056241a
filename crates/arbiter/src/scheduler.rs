//! Fixed-interval scheduling of the periodic service callback.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::controller::ControlEvent;
use crate::observer::LifecycleObserver;
use crate::service::{RunTick, Service};

pub(crate) const SCHEDULER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::scheduler");

/// Errors surfaced while collecting the scheduler thread.
#[derive(Debug, Error)]
pub(crate) enum SchedulerError {
    /// The scheduler thread panicked, usually inside the tick callback.
    #[error("scheduler thread panicked")]
    ThreadPanic,
}

/// Cadence of the tick loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cadence {
    pub(crate) interval: Duration,
    pub(crate) immediate_first: bool,
}

/// Handle to the background scheduler thread.
pub(crate) struct SchedulerHandle {
    stop: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Requests a cooperative stop; an in-flight tick still completes.
    pub(crate) fn stop(&self) {
        // Fails only when the loop has already exited.
        let _ = self.stop.send(());
    }

    /// Waits for the scheduler thread, including any in-flight tick.
    pub(crate) fn join(mut self) -> Result<(), SchedulerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SchedulerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

/// Spawns the tick loop for `service`.
pub(crate) fn start<S>(
    service: Arc<S>,
    cadence: Cadence,
    events: Sender<ControlEvent>,
    observer: Arc<dyn LifecycleObserver>,
) -> SchedulerHandle
where
    S: Service,
{
    let (stop_tx, stop_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        run_loop(service.as_ref(), cadence, &events, observer.as_ref(), &stop_rx);
    });
    SchedulerHandle {
        stop: stop_tx,
        handle: Some(handle),
    }
}

fn run_loop<S>(
    service: &S,
    cadence: Cadence,
    events: &Sender<ControlEvent>,
    observer: &dyn LifecycleObserver,
    stop: &Receiver<()>,
) where
    S: Service,
{
    let interval = cadence.interval;
    let mut next = if cadence.immediate_first {
        Instant::now()
    } else {
        Instant::now() + interval
    };
    let mut sequence = 0u64;
    loop {
        // Sleep until the next slot, waking early on a stop request.
        let now = Instant::now();
        if next > now {
            match stop.recv_timeout(next - now) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        } else {
            match stop.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }
        }

        sequence += 1;
        let tick = RunTick::new(sequence);
        debug!(target: SCHEDULER_TARGET, sequence, "dispatching tick");
        if let Err(error) = service.on_tick(&tick) {
            warn!(
                target: SCHEDULER_TARGET,
                sequence,
                error = %error,
                "tick failed; stopping run"
            );
            // Fails only when the controller has already gone away.
            let _ = events.send(ControlEvent::TickFailed(error));
            break;
        }

        // A stop that arrived while the tick was running ends the loop
        // here; slots elapsing after the request are cancelled, not
        // skipped work.
        match stop.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        // Reschedule on the fixed grid; slots the tick overran are skipped
        // rather than queued or run concurrently.
        next += interval;
        let now = Instant::now();
        let mut missed = 0u64;
        while next <= now {
            next += interval;
            missed += 1;
        }
        if missed > 0 {
            observer.ticks_skipped(sequence, missed);
        }
    }
    debug!(target: SCHEDULER_TARGET, sequence, "scheduler drained");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::service::ServiceError;

    #[derive(Default)]
    struct CountingService {
        started: AtomicUsize,
        finished: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
    }

    impl CountingService {
        fn sleepy(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    impl Service for CountingService {
        fn on_tick(&self, _tick: &RunTick) -> Result<(), ServiceError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("tick rejected".into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct SkipRecorder {
        skips: Mutex<Vec<(u64, u64)>>,
    }

    impl SkipRecorder {
        fn skips(&self) -> Vec<(u64, u64)> {
            self.skips.lock().expect("skip mutex poisoned").clone()
        }
    }

    impl LifecycleObserver for SkipRecorder {
        fn state_changed(&self, _state: crate::controller::LifecycleState) {}

        fn ticks_skipped(&self, after: u64, missed: u64) {
            self.skips
                .lock()
                .expect("skip mutex poisoned")
                .push((after, missed));
        }

        fn reload_requested(&self) {}
    }

    fn spawn(
        service: Arc<CountingService>,
        interval: Duration,
        immediate_first: bool,
    ) -> (SchedulerHandle, mpsc::Receiver<ControlEvent>, Arc<SkipRecorder>) {
        let (events_tx, events_rx) = mpsc::channel();
        let observer = Arc::new(SkipRecorder::default());
        let handle = start(
            service,
            Cadence {
                interval,
                immediate_first,
            },
            events_tx,
            observer.clone(),
        );
        (handle, events_rx, observer)
    }

    #[test]
    fn first_tick_waits_one_interval() {
        let service = Arc::new(CountingService::default());
        let (handle, _events, _observer) = spawn(service.clone(), Duration::from_millis(200), false);
        thread::sleep(Duration::from_millis(50));
        handle.stop();
        handle.join().expect("join scheduler");
        assert_eq!(service.started(), 0, "no tick should fire before one interval");
    }

    #[test]
    fn immediate_first_tick_fires_at_once() {
        let service = Arc::new(CountingService::default());
        let (handle, _events, _observer) = spawn(service.clone(), Duration::from_millis(500), true);
        thread::sleep(Duration::from_millis(100));
        handle.stop();
        handle.join().expect("join scheduler");
        assert_eq!(service.started(), 1);
    }

    #[test]
    fn ticks_fire_once_per_interval() {
        let service = Arc::new(CountingService::default());
        let (handle, _events, observer) = spawn(service.clone(), Duration::from_millis(25), false);
        thread::sleep(Duration::from_millis(110));
        handle.stop();
        handle.join().expect("join scheduler");
        let count = service.started();
        assert!((2..=5).contains(&count), "expected ~4 ticks, saw {count}");
        assert!(observer.skips().is_empty(), "fast ticks should not skip");
    }

    #[test]
    fn overrunning_ticks_skip_missed_slots() {
        // Interval 40ms, tick 60ms: ticks fire at 40, 120, and 200ms, each
        // overrun skipping exactly one slot.
        let service = Arc::new(CountingService::sleepy(Duration::from_millis(60)));
        let (handle, _events, observer) = spawn(service.clone(), Duration::from_millis(40), false);
        thread::sleep(Duration::from_millis(230));
        handle.stop();
        handle.join().expect("join scheduler");
        assert_eq!(service.started(), 3, "overlapping slots must be skipped, not queued");
        assert_eq!(service.finished(), 3, "every started tick runs to completion");
        let skips = observer.skips();
        assert_eq!(skips.len(), 2, "expected two skip reports, saw {skips:?}");
        assert!(skips.iter().all(|(_, missed)| *missed == 1));
    }

    #[test]
    fn stop_waits_for_the_inflight_tick() {
        let service = Arc::new(CountingService::sleepy(Duration::from_millis(80)));
        let (handle, _events, _observer) = spawn(service.clone(), Duration::from_millis(10), false);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(service.started(), 1, "tick should be in flight");
        handle.stop();
        handle.join().expect("join scheduler");
        assert_eq!(service.finished(), 1, "in-flight tick must complete before join returns");
        assert_eq!(service.started(), service.finished());
    }

    #[test]
    fn tick_failure_is_reported_and_ends_the_loop() {
        let service = Arc::new(CountingService::failing());
        let (handle, events, _observer) = spawn(service.clone(), Duration::from_millis(10), false);
        match events.recv_timeout(Duration::from_secs(2)) {
            Ok(ControlEvent::TickFailed(error)) => {
                assert_eq!(error.to_string(), "tick rejected");
            }
            other => panic!("expected a tick failure event, saw {other:?}"),
        }
        handle.join().expect("join scheduler");
        assert_eq!(service.started(), 1, "the loop must stop after a failed tick");
    }
}
