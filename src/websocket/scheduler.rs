//! Channel Scheduler
//!
//! Owns one repeating task per channel. All tasks are released together:
//! `shutdown` (or dropping the scheduler) aborts every handle, so no timer
//! outlives a hub stop.

use std::future::Future;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Default)]
pub struct ChannelScheduler {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl ChannelScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `period`, starting one period from now.
    ///
    /// The task holds only a weak reference to its owner and exits once the
    /// owner is gone.
    pub fn every<T, F, Fut>(&mut self, name: &str, period: Duration, owner: Weak<T>, tick: F)
    where
        T: Send + Sync + 'static,
        F: Fn(std::sync::Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(owner) = owner.upgrade() else {
                    break;
                };
                tick(owner).await;
            }
        });

        self.tasks.push((name.to_string(), handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every scheduled task
    pub fn shutdown(&mut self) {
        for (name, handle) in self.tasks.drain(..) {
            handle.abort();
            tracing::trace!(channel = %name, "Channel task cancelled");
        }
    }
}

impl Drop for ChannelScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
