//! Generic bounded-parallelism worker pool. Independent of
//! discovery: a job is just `{id, handler(ctx), optional result_sink}`.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};

/// Bounded queue depth ahead of the worker tier.
const QUEUE_DEPTH: usize = 100;

pub type JobHandler =
    Box<dyn FnOnce(CancelToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send>;

pub struct Job {
    pub id: String,
    pub handler: JobHandler,
    pub result_sink: Option<oneshot::Sender<Result<()>>>,
}

impl Job {
    pub fn new(id: impl Into<String>, handler: JobHandler) -> Self {
        Self {
            id: id.into(),
            handler,
            result_sink: None,
        }
    }

    pub fn with_result_sink(mut self, sink: oneshot::Sender<Result<()>>) -> Self {
        self.result_sink = Some(sink);
        self
    }
}

struct Running {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

/// `start()`, `stop()`, `submit(job)`. Exactly `max_workers` handlers run
/// concurrently; `submit` rejects once `stop` has begun.
pub struct WorkerPool {
    max_workers: usize,
    cancel: CancelToken,
    running: Mutex<Option<Running>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancel: CancelToken::new(),
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return;
        }

        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let receiver = std::sync::Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(self.max_workers);
        for _ in 0..self.max_workers {
            let receiver = receiver.clone();
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else { break };
                    let result = (job.handler)(cancel.clone()).await;
                    if let Some(sink) = job.result_sink {
                        let _ = sink.send(result);
                    }
                }
            }));
        }

        *guard = Some(Running { sender, workers });
    }

    /// Submit a job. Rejects with `EngineError::Cancelled` once `stop` has
    /// been called.
    pub async fn submit(&self, job: Job) -> Result<()> {
        let guard = self.running.lock().await;
        match guard.as_ref() {
            Some(running) => running
                .sender
                .send(job)
                .await
                .map_err(|_| EngineError::Cancelled),
            None => Err(EngineError::Cancelled),
        }
    }

    /// Closes the job channel and waits for every worker to drain. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            drop(running.sender);
            for worker in running.workers {
                let _ = worker.await;
            }
        }
    }
}
