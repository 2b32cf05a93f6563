//! # Scheduler
//!
//! Pool di worker limitato che esegue i `Task`.
//!
//! ## Responsabilità:
//! - Limita il lavoro concorrente con un `Semaphore` da `jobs` permessi
//! - I file tengono un permesso per tutta la pipeline
//! - Gli archivi tengono un permesso solo per estrazione e re-packaging,
//!   mai mentre aspettano i figli (niente deadlock con pool da 1)
//! - Conta i task in volo: il contatore sale in `submit`, prima dello spawn,
//!   così `drain` non può finire mentre un archivio sottomette i figli
//! - Unisce ogni risultato nei `Totals` una sola volta e lo stampa

use crate::comic_processor;
use crate::error::{OptimizeError, Result};
use crate::image_processor::ImageProcessor;
use crate::optimizer::{OptimizationOutcome, Task, TaskHandle};
use crate::progress::{Reporter, Totals};
use crate::tool_resolver::ToolPathResolver;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    permits: Arc<Semaphore>,
    totals: Arc<Totals>,
    resolver: Arc<ToolPathResolver>,
    images: ImageProcessor,
    reporter: Reporter,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight counter when a task ends, panics included
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Scheduler {
    pub fn new(
        jobs: usize,
        resolver: Arc<ToolPathResolver>,
        totals: Arc<Totals>,
        reporter: Reporter,
    ) -> Self {
        let jobs = jobs.max(1);
        debug!("Scheduler with {} workers", jobs);
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(jobs)),
                images: ImageProcessor::new(Arc::clone(&resolver), Arc::clone(&totals)),
                totals,
                resolver,
                reporter,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn totals(&self) -> &Arc<Totals> {
        &self.inner.totals
    }

    pub fn resolver(&self) -> &ToolPathResolver {
        &self.inner.resolver
    }

    pub fn reporter(&self) -> &Reporter {
        &self.inner.reporter
    }

    /// Tasks submitted and not finished yet
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// One worker slot
    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Ok(Arc::clone(&self.inner.permits).acquire_owned().await?)
    }

    /// Queue a task. Never blocks: the worker budget is enforced inside
    /// the spawned task.
    pub fn submit(&self, task: Task) -> TaskHandle {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.inner));
        self.inner.reporter.task_submitted();

        let path = task.path.clone();
        let scheduler = self.clone();
        let join = tokio::spawn(async move {
            let _guard = guard;
            scheduler.execute(task).await
        });

        TaskHandle { path, join }
    }

    /// A file the walk found but could not classify
    pub fn record_rejected(&self, path: &Path, error: &OptimizeError) {
        warn!("{}: {}", path.display(), error);
        self.inner.totals.add_failure();
        self.inner.reporter.rejected(path, &error.to_string());
    }

    /// Wait until every submitted task, children included, has finished
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.in_flight() == 0 {
                break;
            }
            notified.await;
        }
    }

    async fn execute(&self, task: Task) -> OptimizationOutcome {
        let result = if task.is_archive() {
            comic_processor::optimize_archive(self, &task).await
        } else {
            self.optimize_file(&task).await
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{}: {}", task.display, e);
                OptimizationOutcome::failed(&task, &e)
            }
        };

        self.inner.totals.record(&outcome);
        self.inner.reporter.task_finished(&outcome);
        outcome
    }

    async fn optimize_file(&self, task: &Task) -> Result<OptimizationOutcome> {
        let _permit = self.acquire().await?;
        self.inner.images.optimize(task).await
    }
}
