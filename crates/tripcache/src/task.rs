//! Cancellable repeating background task

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// A task that runs a closure every `period` until stopped.
///
/// The first run happens one full period after spawning. Ticks never overlap:
/// a slow run delays the next one. Dropping the handle aborts the task.
pub struct RepeatingTask {
    name: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    /// Spawn `tick` onto the current Tokio runtime.
    ///
    /// The loop also ends on its own when `tick` returns
    /// [`ControlFlow::Break`], for example once its owner is gone.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let task_name = name.clone();

        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if tick().await.is_break() {
                            debug!("{} finished: owner dropped", task_name);
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("{} shutting down", task_name);
                        break;
                    }
                }
            }
        });

        info!("Started {} (every {:?})", name, period);
        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Stop issuing new runs and wait for the loop to exit.
    ///
    /// A run already in progress is allowed to complete.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
