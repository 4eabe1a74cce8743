use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest period a periodic task will run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A background job that can be stopped without waiting on it for longer
/// than a grace period. Either repeats on an interval or drains a queue.
pub struct BackgroundTask {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Run `tick` every `period`, starting one period from now.
    pub fn periodic<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_interval(name, period, false, tick)
    }

    /// Like [`periodic`](Self::periodic), but the first tick runs right away.
    pub fn periodic_now<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_interval(name, period, true, tick)
    }

    /// Handle every item of `queue`, one at a time, until stopped or until
    /// all senders are gone.
    pub fn consumer<T, F, Fut>(name: &'static str, mut queue: mpsc::Receiver<T>, mut handle: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Queued items are handled before a stop request.
                    biased;
                    item = queue.recv() => match item {
                        Some(item) => handle(item).await,
                        None => break,
                    },
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(task = name, "queue consumer exited");
        });

        Self { name, stop, handle }
    }

    fn spawn_interval<F, Fut>(name: &'static str, period: Duration, immediate: bool, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period < MIN_PERIOD {
            tracing::warn!(task = name, period_ms = period.as_millis() as u64, "period too short, clamping");
        }
        let period = period.max(MIN_PERIOD);

        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            if !immediate {
                interval.tick().await;
            }

            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(task = name, "periodic task exited");
        });

        Self { name, stop, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait at most `grace` for it, then abort it.
    /// An aborted task is dropped at its next await point, so in-flight work
    /// never outlives the grace period.
    pub async fn stop(self, grace: Duration) {
        let _ = self.stop.send(true);
        let mut handle = self.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            tracing::warn!(task = self.name, "background task did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }
    }
}
