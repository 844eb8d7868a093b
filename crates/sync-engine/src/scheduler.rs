// crates/sync-engine/src/scheduler.rs
//! Interval scheduler for sync cycles
//!
//! One background task per enabled engine. A cycle always runs to
//! completion: the next tick, a foreground return, or a stop request is
//! only looked at once the running cycle has finished.

use crate::lifecycle::Visibility;
use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Something that can run one sync cycle
#[async_trait]
pub(crate) trait CycleRunner: Send + Sync {
    async fn run_cycle(&self);
}

/// Handle to a running scheduler task
pub(crate) struct Scheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns the scheduler on the current runtime
    ///
    /// The task holds the runner weakly and ends once it is dropped.
    pub fn start(
        runner: Weak<dyn CycleRunner>,
        period: Duration,
        visibility: watch::Receiver<Visibility>,
        pause_in_background: bool,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            runner,
            period,
            visibility,
            pause_in_background,
            shutdown_rx,
        ));
        log::info!("Sync scheduler started, interval {:?}", period);
        Self { shutdown, handle }
    }

    /// Asks the task to stop after any in-flight cycle
    pub fn stop(self) -> JoinHandle<()> {
        self.shutdown.send_replace(true);
        log::info!("Sync scheduler stopping");
        self.handle
    }

    /// Returns true if the task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(
    runner: Weak<dyn CycleRunner>,
    period: Duration,
    mut visibility: watch::Receiver<Visibility>,
    pause_in_background: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut watching = pause_in_background;
    let mut paused = watching && *visibility.borrow_and_update() == Visibility::Background;

    loop {
        let run_now = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                false
            }
            changed = visibility.changed(), if watching => {
                if changed.is_err() {
                    // lifecycle source dropped: keep the current mode
                    watching = false;
                    false
                } else {
                    let background = *visibility.borrow_and_update() == Visibility::Background;
                    if background && !paused {
                        paused = true;
                        log::info!("Host in background, sync paused");
                        false
                    } else if !background && paused {
                        paused = false;
                        log::info!("Host in foreground, sync resumed");
                        ticker.reset();
                        true
                    } else {
                        false
                    }
                }
            }
            _ = ticker.tick() => !paused,
        };

        if run_now {
            let Some(runner) = runner.upgrade() else {
                break;
            };
            runner.run_cycle().await;
        }
    }

    log::debug!("Sync scheduler task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{HostLifecycle, ManualLifecycle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl CycleRunner for Counter {
        async fn run_cycle(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn weak(counter: &Arc<Counter>) -> Weak<dyn CycleRunner> {
        let runner: Arc<dyn CycleRunner> = counter.clone();
        Arc::downgrade(&runner)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_interval() {
        let counter = Arc::new(Counter::default());
        let lifecycle = ManualLifecycle::new();
        let scheduler = Scheduler::start(
            weak(&counter),
            Duration::from_secs(10),
            lifecycle.subscribe(),
            true,
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 3);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_pauses_and_foreground_triggers() {
        let counter = Arc::new(Counter::default());
        let lifecycle = ManualLifecycle::new();
        let scheduler = Scheduler::start(
            weak(&counter),
            Duration::from_secs(10),
            lifecycle.subscribe(),
            true,
        );

        lifecycle.to_background();
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);

        lifecycle.to_foreground();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_ignored_when_not_pausing() {
        let counter = Arc::new(Counter::default());
        let lifecycle = ManualLifecycle::new();
        let scheduler = Scheduler::start(
            weak(&counter),
            Duration::from_secs(10),
            lifecycle.subscribe(),
            false,
        );

        lifecycle.to_background();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_task() {
        let counter = Arc::new(Counter::default());
        let lifecycle = ManualLifecycle::new();
        let scheduler = Scheduler::start(
            weak(&counter),
            Duration::from_secs(10),
            lifecycle.subscribe(),
            true,
        );
        scheduler.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_runner_ends_task() {
        let counter = Arc::new(Counter::default());
        let lifecycle = ManualLifecycle::new();
        let scheduler = Scheduler::start(
            weak(&counter),
            Duration::from_secs(1),
            lifecycle.subscribe(),
            true,
        );
        drop(counter);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(scheduler.is_finished());
    }
}
