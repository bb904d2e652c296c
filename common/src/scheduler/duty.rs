// Periodic duties: each duty is a tokio task driven by its own interval

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Handle of a running duty; aborting it also cancels the body in progress
pub struct DutyHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl DutyHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DutyHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Clears the running flag when a body finishes or is cancelled
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Run `body` every `period`. A tick arriving while the previous body is
/// still running is dropped; each body holds a permit of `permits` while it runs.
pub fn spawn_guarded<F, Fut>(
    name: &'static str,
    period: Duration,
    permits: Arc<Semaphore>,
    body: F,
) -> DutyHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let handle = tokio::spawn(async move {
        // Dropping the set when this task is aborted aborts the body in flight
        let mut bodies = JoinSet::new();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            while bodies.try_join_next().is_some() {}

            if running.swap(true, Ordering::AcqRel) {
                debug!(duty = name, "Previous run still in progress, skipping tick");
                continue;
            }

            let flag = RunningFlag(Arc::clone(&running));
            let permits = Arc::clone(&permits);
            let run = body();
            bodies.spawn(async move {
                let _flag = flag;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                run.await;
            });
        }
    });

    DutyHandle { name, handle }
}

/// Run `body` every `period` inline in the duty task; slow runs delay later ticks
pub fn spawn_inline<F, Fut>(name: &'static str, period: Duration, body: F) -> DutyHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            body().await;
        }
    });

    DutyHandle { name, handle }
}
