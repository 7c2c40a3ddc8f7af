//! Bounded-concurrency worker pool
//!
//! Turns a batch of jobs into a stream of responses while running at most
//! `concurrency` work functions at once. Jobs enter a bounded FIFO queue;
//! responses come out in completion order. Every job yields exactly one
//! response, whether it succeeds, fails, panics, or is cancelled before it
//! starts.

use futures::future::BoxFuture;
use futures::Stream;
use std::any::Any;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Highest accepted concurrency
pub const MAX_CONCURRENCY: usize = 1024;

/// Worker pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("concurrency must be greater than zero")]
    InvalidConcurrency,

    #[error("concurrency must be at most {}", MAX_CONCURRENCY)]
    ConcurrencyTooHigh,

    #[error("requests were already sent to this pool")]
    AlreadySent,

    #[error("pool is already running")]
    AlreadyRunning,

    #[error("responses were already taken")]
    ResponsesTaken,

    #[error("job cancelled before it started")]
    Cancelled,

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Work function: `(cancellation, payload, options) -> result`
pub type WorkFn<In, Opt, Out> =
    Arc<dyn Fn(CancellationToken, In, Opt) -> BoxFuture<'static, anyhow::Result<Out>> + Send + Sync>;

/// A unit of work owned by the submitter until it is sent
pub struct Job<In, Opt, Out> {
    pub object: In,
    pub options: Opt,
    pub exec_fn: WorkFn<In, Opt, Out>,
}

impl<In, Opt, Out> Job<In, Opt, Out> {
    pub fn new(object: In, options: Opt, exec_fn: WorkFn<In, Opt, Out>) -> Self {
        Self {
            object,
            options,
            exec_fn,
        }
    }
}

/// Outcome of one job
#[derive(Debug)]
pub struct Response<Out> {
    pub result: Result<Out, PoolError>,
}

impl<Out> Response<Out> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<Out, PoolError> {
        self.result
    }
}

/// Single-consumer stream of responses; ends once every worker has exited
pub struct ResponseStream<Out> {
    rx: mpsc::Receiver<Response<Out>>,
}

impl<Out> ResponseStream<Out> {
    pub async fn recv(&mut self) -> Option<Response<Out>> {
        self.rx.recv().await
    }
}

impl<Out> Stream for ResponseStream<Out> {
    type Item = Response<Out>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Generic pool over payload, options, and result types
pub struct WorkerPool<In, Opt, Out> {
    concurrency: usize,
    requests_tx: StdMutex<Option<mpsc::Sender<Job<In, Opt, Out>>>>,
    requests_rx: StdMutex<Option<mpsc::Receiver<Job<In, Opt, Out>>>>,
    responses_tx: StdMutex<Option<mpsc::Sender<Response<Out>>>>,
    responses_rx: StdMutex<Option<mpsc::Receiver<Response<Out>>>>,
}

impl<In, Opt, Out> WorkerPool<In, Opt, Out>
where
    In: Send + 'static,
    Opt: Send + 'static,
    Out: Send + 'static,
{
    /// Create a pool running at most `concurrency` jobs at once. The job
    /// queue and the response buffer are both bounded by `concurrency`.
    pub fn new(concurrency: usize) -> Result<Self, PoolError> {
        if concurrency == 0 {
            return Err(PoolError::InvalidConcurrency);
        }
        if concurrency > MAX_CONCURRENCY {
            return Err(PoolError::ConcurrencyTooHigh);
        }

        let (requests_tx, requests_rx) = mpsc::channel(concurrency);
        let (responses_tx, responses_rx) = mpsc::channel(concurrency);

        Ok(Self {
            concurrency,
            requests_tx: StdMutex::new(Some(requests_tx)),
            requests_rx: StdMutex::new(Some(requests_rx)),
            responses_tx: StdMutex::new(Some(responses_tx)),
            responses_rx: StdMutex::new(Some(responses_rx)),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Enqueue the whole batch, then close the send side. Blocks while the
    /// queue is full, so run it on a different task than [`Self::run`].
    pub async fn send_requests<I>(&self, jobs: I) -> Result<(), PoolError>
    where
        I: IntoIterator<Item = Job<In, Opt, Out>>,
    {
        let tx = take(&self.requests_tx).ok_or(PoolError::AlreadySent)?;

        let mut sent = 0usize;
        for job in jobs {
            if tx.send(job).await.is_err() {
                warn!(sent, "worker pool stopped accepting jobs");
                break;
            }
            sent += 1;
        }

        debug!(sent, "all jobs submitted to worker pool");
        Ok(())
    }

    /// Start `concurrency` workers and wait for them to drain the queue.
    /// The response stream closes when the last worker exits.
    pub async fn run(&self, token: CancellationToken) -> Result<(), PoolError> {
        self.run_workers(self.concurrency, token).await
    }

    async fn run_workers(&self, workers: usize, token: CancellationToken) -> Result<(), PoolError> {
        let requests = take(&self.requests_rx).ok_or(PoolError::AlreadyRunning)?;
        let responses = take(&self.responses_tx).ok_or(PoolError::AlreadyRunning)?;
        let requests = Arc::new(Mutex::new(requests));

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            tasks.spawn(worker_loop(
                worker_id,
                requests.clone(),
                responses.clone(),
                token.clone(),
            ));
        }
        drop(responses);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "worker pool worker exited abnormally");
            }
        }

        debug!(workers, "worker pool drained");
        Ok(())
    }

    /// Take the response stream. Only one consumer may take it.
    pub fn responses(&self) -> Result<ResponseStream<Out>, PoolError> {
        take(&self.responses_rx)
            .map(|rx| ResponseStream { rx })
            .ok_or(PoolError::ResponsesTaken)
    }

    /// Submit `jobs` and run them on background tasks, returning the
    /// response stream to drain. No more workers start than there are jobs.
    pub fn execute(
        self: Arc<Self>,
        jobs: Vec<Job<In, Opt, Out>>,
        token: CancellationToken,
    ) -> Result<ResponseStream<Out>, PoolError> {
        let responses = self.responses()?;
        let workers = self.concurrency.min(jobs.len());

        let sender = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sender.send_requests(jobs).await {
                warn!(error = %e, "failed to submit jobs to worker pool");
            }
        });
        tokio::spawn(async move {
            if let Err(e) = self.run_workers(workers, token).await {
                warn!(error = %e, "worker pool failed to run");
            }
        });

        Ok(responses)
    }
}

fn take<T>(slot: &StdMutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
}

async fn worker_loop<In, Opt, Out>(
    worker_id: usize,
    requests: Arc<Mutex<mpsc::Receiver<Job<In, Opt, Out>>>>,
    responses: mpsc::Sender<Response<Out>>,
    token: CancellationToken,
) where
    In: Send + 'static,
    Opt: Send + 'static,
    Out: Send + 'static,
{
    loop {
        let job = {
            let mut requests = requests.lock().await;
            requests.recv().await
        };
        let Some(job) = job else {
            break;
        };

        // queued jobs still get a response after cancellation, they just never start
        let result = if token.is_cancelled() {
            Err(PoolError::Cancelled)
        } else {
            run_job(job, token.clone()).await
        };

        if responses.send(Response { result }).await.is_err() {
            debug!(worker_id, "response consumer went away, stopping worker");
            break;
        }
    }
}

async fn run_job<In, Opt, Out>(job: Job<In, Opt, Out>, token: CancellationToken) -> Result<Out, PoolError>
where
    In: Send + 'static,
    Opt: Send + 'static,
    Out: Send + 'static,
{
    let Job {
        object,
        options,
        exec_fn,
    } = job;

    // a separate task keeps a panicking job from taking the worker down
    match tokio::spawn(exec_fn(token, object, options)).await {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(PoolError::Failed(e)),
        Err(e) if e.is_panic() => Err(PoolError::Panicked(panic_message(e.into_panic()))),
        Err(_) => Err(PoolError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
