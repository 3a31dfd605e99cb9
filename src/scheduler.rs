//! Named repeating timers tied to the dashboard's lifetime.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owns one repeating task per source key. Dropping the scheduler cancels
/// every timer.
#[derive(Default)]
pub struct Scheduler {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Runs `refresh` immediately and then every `interval`. A previous timer
    /// under the same key is cancelled first. A tick that comes due while
    /// `refresh` is still running is delayed, not stacked.
    pub fn schedule<F, Fut>(&mut self, key: &str, interval: Duration, mut refresh: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                refresh().await;
            }
        });
        if let Some(old) = self.tasks.insert(key.to_string(), task) {
            old.abort();
        }
        tracing::debug!(key, interval_ms = interval.as_millis() as u64, "Timer scheduled");
    }

    #[cfg(test)]
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.tasks.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_scheduled(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn teardown(&mut self) {
        for (key, handle) in self.tasks.drain() {
            handle.abort();
            tracing::debug!(key = %key, "Timer cancelled");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}
