use crate::{
    context::Context,
    queue::WorkQueue,
    reconcile::{
        self,
        ReconcileError,
    },
};
use std::sync::Arc;
use tokio::sync::watch;

/// A failing key is retried this many times before it is dropped.
pub const MAX_RETRIES: u32 = 5;

/// Receives keys that still failed after all retries.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, key: &str, err: &ReconcileError);
}

/// Reports by logging at error level.
#[derive(Debug, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, key: &str, err: &ReconcileError) {
        error!(%key, "giving up on key after {MAX_RETRIES} retries: {err}");
    }
}

pub struct Controller {
    ctx: Arc<Context>,
    queue: WorkQueue<String>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Controller {
    pub fn new(ctx: Arc<Context>, queue: WorkQueue<String>) -> Self {
        Self {
            ctx,
            queue,
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Takes one key off the queue and reconciles it. Returns false once the queue is shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        // a panicking sync must not leave the key marked as processing
        let ctx = self.ctx.clone();
        let task_key = key.clone();
        let result = match tokio::spawn(async move { reconcile::sync(&task_key, &ctx).await }).await {
            Ok(result) => result,
            Err(err) => Err(ReconcileError::Aborted {
                key: key.clone(),
                reason: err.to_string(),
            }),
        };
        self.handle_err(result, &key);
        self.queue.done(&key);

        true
    }

    fn handle_err(&self, result: Result<(), ReconcileError>, key: &str) {
        let Err(err) = result else {
            self.queue.forget(key);
            return;
        };

        if self.queue.num_requeues(key) < MAX_RETRIES {
            info!("error syncing {key}: {err}");
            self.queue.add_rate_limited(key.to_string());
            return;
        }

        self.queue.forget(key);
        self.reporter.report(key, &err);
        info!("dropping {key:?} out of the queue: {err}");
    }

    /// Runs `threadiness` workers until `shutdown` flips to true, then drains the queue and waits for the workers.
    pub async fn run(self: Arc<Self>, threadiness: usize, shutdown: watch::Receiver<bool>) {
        info!(threadiness, "starting controller");

        let workers: Vec<_> = (0..threadiness.max(1))
            .map(|id| tokio::spawn(self.clone().run_worker(id)))
            .collect();

        wait_for_shutdown(shutdown).await;

        info!("stopping controller");
        self.queue.shutdown();

        for result in futures::future::join_all(workers).await {
            if let Err(err) = result {
                error!("worker failed: {err}");
            }
        }

        info!("controller stopped");
    }

    async fn run_worker(self: Arc<Self>, id: usize) {
        while self.process_next_item().await {}
        debug!(worker = id, "worker stopped");
    }
}

/// Resolves once `shutdown` is true or its sender is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
