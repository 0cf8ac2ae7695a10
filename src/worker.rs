//! Background refreshes. A request that should not wait for the scrape hands
//! the pipeline run to this pool and answers from the current file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::pipeline::{Pipeline, UpdateReport};
use crate::types::Collection;

type RunOutput = Option<(Collection, UpdateReport)>;
type Run = Shared<BoxFuture<'static, RunOutput>>;
type InFlight = Arc<Mutex<HashMap<PathBuf, Run>>>;

/// Bounded set of background pipeline runs, at most one per collection file.
#[derive(Clone)]
pub struct RefreshPool {
    pipeline: Arc<Pipeline>,
    slots: Arc<Semaphore>,
    in_flight: InFlight,
}

/// A scheduled refresh. Dropping the handle detaches the run; it still completes.
pub struct RefreshHandle {
    run: Run,
}

impl RefreshHandle {
    /// Wait for the run and return its collection. A panicked run yields `None`.
    pub async fn join(self) -> RunOutput { self.run.await }
}

/// Clears a path's in-flight entry when its task ends, panics included.
struct Finished {
    in_flight: InFlight,
    path: PathBuf,
}

impl Drop for Finished {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.path);
    }
}

impl RefreshPool {
    pub fn new(pipeline: Arc<Pipeline>, workers: usize) -> Self {
        Self { pipeline, slots: Arc::new(Semaphore::new(workers.max(1))), in_flight: InFlight::default() }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> { &self.pipeline }

    /// Schedule `pipeline.update(url, path)` and return immediately. A submit
    /// for a path whose run has not finished joins that run instead of queueing
    /// another one.
    pub fn submit(&self, url: String, path: PathBuf) -> RefreshHandle {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = in_flight.get(&path) {
            debug!(path = %path.display(), "refresh already running, joining it");
            return RefreshHandle { run: run.clone() };
        }

        let pipeline = self.pipeline.clone();
        let slots = self.slots.clone();
        let finished = Finished { in_flight: self.in_flight.clone(), path: path.clone() };
        let key = path.clone();
        let task = tokio::spawn(async move {
            let _finished = finished;
            let _slot = slots.acquire_owned().await.ok();
            debug!(%url, path = %path.display(), "background refresh started");
            pipeline.update_with_report(&url, &path).await
        });
        let run = async move {
            match task.await {
                Ok(out) => Some(out),
                Err(e) => {
                    error!(error = %e, "background refresh did not complete");
                    None
                }
            }
        }
        .boxed()
        .shared();
        in_flight.insert(key, run.clone());
        RefreshHandle { run }
    }
}
