use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::time::{Instant, MissedTickBehavior};

use crate::worker;

/// Runs periodic tasks for gauges and meters.
///
/// Backed by a small multi-threaded Tokio runtime. Dropping the scheduler cancels all tasks
/// without waiting for them, which is safe from any context, including its own tasks.
pub(crate) struct Scheduler {
    runtime: Option<Runtime>,
}

impl Scheduler {
    /// Starts the runtime with named worker threads.
    pub fn new(name: &str) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(name)
            .enable_time()
            .build()?;

        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Calls `tick` every `period`, starting after `initial_delay`.
    ///
    /// A tick that takes longer than the period delays the following ticks instead of bursting.
    /// Panics in `tick` are logged and the task keeps running.
    pub fn spawn_periodic<F>(&self, initial_delay: Duration, period: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                worker::run_guarded("scheduler", &mut tick);
            }
        });
    }

    fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        if let Some(runtime) = &self.runtime {
            runtime.spawn(future);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tally_log::debug!("scheduler stopped");
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.runtime.is_some())
            .finish()
    }
}
