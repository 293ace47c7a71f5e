//! Request scheduler - runs requests as chunk tasks on a bounded worker pool

use crate::config::AccessManagerConfig;
use crate::error::{Result, VdsError};
use crate::page::PageHandle;
use crate::page_accessor::VolumeDataPageAccessor;
use crate::request::{RequestId, RequestTable};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

/// Work done by a request on each of its chunks
pub(crate) trait ChunkJob: Send + Sync {
    /// Other chunks read while processing `chunk`. Their pages stay pinned
    /// only for the duration of that call.
    fn neighbours(&self, _chunk: i64) -> Vec<i64> {
        Vec::new()
    }

    /// Consume one loaded page. Called concurrently for different chunks.
    fn process_chunk(&self, page: PageHandle, neighbours: &[PageHandle]) -> Result<()>;

    /// Runs once every chunk has been processed
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Run a future on `handle` and wait for it from a plain thread
pub(crate) fn run_blocking<F, T>(handle: &Handle, future: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    handle.spawn(async move {
        let _ = tx.send(future.await);
    });
    rx.recv()
        .map_err(|_| VdsError::Canceled("worker pool shut down".to_string()))?
}

pub struct RequestScheduler {
    runtime: Option<Runtime>,
    handle: Handle,
    requests: Arc<RequestTable>,
    max_concurrent_chunk_tasks: usize,
}

impl RequestScheduler {
    pub fn new(config: &AccessManagerConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("vds-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            requests: Arc::new(RequestTable::new()),
            max_concurrent_chunk_tasks: config.max_concurrent_chunk_tasks,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn requests(&self) -> &Arc<RequestTable> {
        &self.requests
    }

    /// Start a request over `chunks` of the accessor's layer and return its id
    pub(crate) fn submit(
        &self,
        accessor: Arc<VolumeDataPageAccessor>,
        chunks: Vec<i64>,
        job: Arc<dyn ChunkJob>,
    ) -> RequestId {
        let id = self.requests.create(chunks.len());
        log::debug!(
            "request {}: {} chunks of {}",
            id,
            chunks.len(),
            accessor.layer().name()
        );
        let requests = Arc::clone(&self.requests);
        let max_concurrent = self.max_concurrent_chunk_tasks;
        self.handle.spawn(async move {
            requests.mark_running(id);
            match run_request(id, &requests, &accessor, chunks, job.as_ref(), max_concurrent).await {
                Ok(()) => requests.finish(id),
                Err(e) => {
                    log::debug!("request {} canceled: {}", id, e);
                    requests.fail(id, e.to_string());
                }
            }
        });
        id
    }
}

async fn run_request(
    id: RequestId,
    requests: &RequestTable,
    accessor: &VolumeDataPageAccessor,
    chunks: Vec<i64>,
    job: &dyn ChunkJob,
    max_concurrent: usize,
) -> Result<()> {
    // After a failure no new chunk starts, but chunks already running finish
    let failed = AtomicBool::new(false);
    let failed = &failed;
    let mut tasks = stream::iter(chunks)
        .map(|chunk| async move {
            if failed.load(Ordering::Acquire) || requests.should_stop(id) {
                return Ok(());
            }
            let result = process_chunk(accessor, chunk, job).await;
            match &result {
                Ok(()) => requests.chunk_done(id),
                Err(_) => failed.store(true, Ordering::Release),
            }
            result
        })
        .buffer_unordered(max_concurrent);

    let mut first_error = None;
    while let Some(result) = tasks.next().await {
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    if requests.should_stop(id) {
        return Err(canceled(id));
    }
    job.finish()
}

async fn process_chunk(accessor: &VolumeDataPageAccessor, chunk: i64, job: &dyn ChunkJob) -> Result<()> {
    let page = accessor.read_page(chunk).await?;
    let neighbours = try_join_all(job.neighbours(chunk).into_iter().map(|n| accessor.read_page(n))).await?;
    job.process_chunk(page, &neighbours)
}

fn canceled(id: RequestId) -> VdsError {
    VdsError::Canceled(format!("request {} was canceled", id))
}

impl Drop for RequestScheduler {
    fn drop(&mut self) {
        self.requests.cancel_all("access manager shut down");
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
