//! Background cache warmup
//!
//! Jobs pair a key with a fetcher and a priority. A run executes the selected
//! jobs one at a time in priority order and writes each result under the
//! `static` strategy. Two timers drive runs in the background: a short one
//! for high-priority jobs and a long one for every job.

use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::WarmupConfig;
use crate::error::{BoxError, CacheError};
use crate::strategy::{StrategyManager, STATIC};
use crate::task::RepeatingTask;

/// Warmup job priority; `High` runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// A key to keep warm and the fetcher that produces its value
#[derive(Clone)]
pub struct WarmupJob {
    pub key: String,
    pub priority: Priority,
    fetcher: Fetcher,
}

impl WarmupJob {
    pub fn new<T, F, Fut, E>(key: impl Into<String>, priority: Priority, fetcher: F) -> Self
    where
        T: Serialize,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let fetcher: Fetcher = Arc::new(move || {
            let fetch = fetcher();
            async move {
                let value = fetch.await.map_err(Into::into)?;
                serde_json::to_value(value).map_err(|e| Box::new(e) as BoxError)
            }
            .boxed()
        });

        Self {
            key: key.into(),
            priority,
            fetcher,
        }
    }

    async fn fetch(&self) -> Result<Value, BoxError> {
        (self.fetcher)().await
    }
}

impl fmt::Debug for WarmupJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupJob")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Outcome of a warmup run, keys listed in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl WarmupReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Holds warmup jobs and runs them on demand or on timers
pub struct WarmupScheduler {
    strategies: Arc<StrategyManager>,
    jobs: RwLock<Vec<WarmupJob>>,
    config: WarmupConfig,
    timers: Mutex<Vec<RepeatingTask>>,
}

impl WarmupScheduler {
    pub fn new(strategies: Arc<StrategyManager>, config: WarmupConfig) -> Self {
        Self {
            strategies,
            jobs: RwLock::new(Vec::new()),
            config,
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Register a job.
    ///
    /// A job for an already registered key replaces it in place, keeping its
    /// position in registration order.
    pub fn add_job(&self, job: WarmupJob) {
        let mut jobs = self.jobs.write();
        match jobs.iter_mut().find(|existing| existing.key == job.key) {
            Some(existing) => *existing = job,
            None => jobs.push(job),
        }
    }

    /// Remove the job for `key`; returns whether one was registered
    pub fn remove_job(&self, key: &str) -> bool {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|job| job.key != key);
        jobs.len() != before
    }

    /// Registered jobs in registration order
    pub fn jobs(&self) -> Vec<WarmupJob> {
        self.jobs.read().clone()
    }

    /// Run every job, or only those whose key is in `keys`.
    ///
    /// Jobs run sequentially, high priority first, registration order within
    /// a priority. A failing job is logged and does not stop the rest.
    pub async fn run(&self, keys: Option<&[String]>) -> WarmupReport {
        let jobs: Vec<WarmupJob> = self
            .jobs
            .read()
            .iter()
            .filter(|job| keys.map_or(true, |keys| keys.contains(&job.key)))
            .cloned()
            .collect();
        self.execute(jobs).await
    }

    /// Run only high-priority jobs
    pub async fn run_high_priority(&self) -> WarmupReport {
        let jobs: Vec<WarmupJob> = self
            .jobs
            .read()
            .iter()
            .filter(|job| job.priority == Priority::High)
            .cloned()
            .collect();
        self.execute(jobs).await
    }

    async fn execute(&self, mut jobs: Vec<WarmupJob>) -> WarmupReport {
        jobs.sort_by_key(|job| job.priority);

        let mut report = WarmupReport::default();
        for job in jobs {
            match job.fetch().await {
                Ok(value) => {
                    self.strategies.set_value(&job.key, value, STATIC, None);
                    debug!("Warmed cache key: {}", job.key);
                    report.succeeded.push(job.key);
                }
                Err(e) => {
                    let err = CacheError::fetcher(job.key.as_str(), e);
                    warn!("Warmup job failed: {}", err);
                    report.failed.push(job.key);
                }
            }
        }

        if report.total() > 0 {
            info!(
                "Cache warmup finished: {} succeeded, {} failed",
                report.succeeded.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Start the high-priority and full-run timers.
    ///
    /// Timers hold only a weak reference and stop once the scheduler is
    /// dropped. Calling this again replaces running timers.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Cache warmup disabled");
            return;
        }

        let high = {
            let scheduler = Arc::downgrade(self);
            RepeatingTask::spawn(
                "warmup-high-priority",
                self.config.high_priority_interval,
                move || {
                    let scheduler = scheduler.clone();
                    async move {
                        match scheduler.upgrade() {
                            Some(scheduler) => {
                                scheduler.run_high_priority().await;
                                ControlFlow::Continue(())
                            }
                            None => ControlFlow::Break(()),
                        }
                    }
                },
            )
        };

        let full = {
            let scheduler = Arc::downgrade(self);
            RepeatingTask::spawn("warmup-full", self.config.full_interval, move || {
                let scheduler = scheduler.clone();
                async move {
                    match scheduler.upgrade() {
                        Some(scheduler) => {
                            scheduler.run(None).await;
                            ControlFlow::Continue(())
                        }
                        None => ControlFlow::Break(()),
                    }
                }
            })
        };

        *self.timers.lock() = vec![high, full];
    }

    /// Whether any warmup timer is running
    pub fn is_running(&self) -> bool {
        self.timers.lock().iter().any(RepeatingTask::is_running)
    }

    /// Stop both timers, letting an in-progress run finish
    pub async fn stop(&self) {
        let timers = std::mem::take(&mut *self.timers.lock());
        for timer in timers {
            timer.stop().await;
        }
        debug!("Cache warmup timers stopped");
    }
}
