//! Uniform fan-out execution over an input stream.
//!
//! [`ConcurrentExecutor`] maps a function over an iterable under a chosen
//! concurrency mode, yielding results either in completion or submission
//! order. Both pipeline stages (decompile and scan) run through one of
//! these, each with its own configuration.
//!
//! Inputs are fed to the pool from a dedicated submitter thread, so a lazy
//! upstream iterator keeps producing while earlier results are consumed.
//! This is what lets the scan stage start before all decompiles finish.

use ahash::AHashMap;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How jobs are scheduled.
///
/// `Processed` exists for command-line compatibility with hosts where
/// CPU-bound regex work must escape an interpreter lock; here both parallel
/// modes execute on the same thread pool, since threads already scale
/// regex matching across cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// Same-thread, lazy iteration.
    Serial,
    /// Worker pool sharing the address space.
    #[default]
    Threaded,
    /// Accepted alias for `Threaded`.
    Processed,
}

impl ConcurrencyMode {
    fn is_parallel(self) -> bool {
        !matches!(self, Self::Serial)
    }
}

impl FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" | "main" => Ok(Self::Serial),
            "thread" | "threaded" => Ok(Self::Threaded),
            "process" | "processed" => Ok(Self::Processed),
            other => Err(format!("unknown concurrency type '{other}'")),
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Threaded => write!(f, "thread"),
            Self::Processed => write!(f, "process"),
        }
    }
}

/// Result ordering contract for [`ConcurrentExecutor::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultsOrder {
    /// Yield results as workers finish.
    #[default]
    Completed,
    /// Yield results in the order inputs were submitted; a slow job blocks
    /// later outputs.
    Submitted,
}

impl FromStr for ResultsOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "submitted" => Ok(Self::Submitted),
            other => Err(format!("unknown results order '{other}'")),
        }
    }
}

impl fmt::Display for ResultsOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Submitted => write!(f, "submitted"),
        }
    }
}

/// Executor configuration, one per pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub mode: ConcurrencyMode,
    pub order: ResultsOrder,
    /// Worker count; `None` means the host CPU count.
    pub max_workers: Option<usize>,
    /// Batch granularity for job submission. Values above 1 amortize
    /// channel traffic for very cheap jobs.
    pub chunksize: usize,
    /// Per-job deadline. A job exceeding it is given up on with a warning
    /// and its result treated as missing.
    pub timeout: Option<Duration>,
}

impl ExecutorConfig {
    #[must_use]
    pub fn with_mode(mode: ConcurrencyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

type Job = Box<dyn FnOnce() + Send>;

struct Pool {
    injector: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

/// Reusable façade over "run F over X with mode M".
///
/// The pool is spawned lazily on the first parallel `map` call and shared
/// by subsequent calls. `shutdown` is idempotent and also runs on drop, so
/// a shared executor can be threaded through multiple pipeline stages
/// without leaking workers.
pub struct ConcurrentExecutor {
    config: ExecutorConfig,
    pool: Option<Pool>,
    cancel: Arc<AtomicBool>,
}

impl ConcurrentExecutor {
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            pool: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Maps `f` over `inputs`, returning a stream of results.
    ///
    /// In parallel modes the input iterator is drained on a submitter
    /// thread; in serial mode the returned stream is a lazy adapter and no
    /// threads are involved.
    pub fn map<T, R, F, I>(&mut self, f: F, inputs: I) -> ResultStream<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send,
    {
        if !self.config.mode.is_parallel() {
            let iter = inputs.into_iter().map(f);
            return ResultStream {
                inner: StreamInner::Serial(Box::new(iter)),
            };
        }

        let injector = self.ensure_pool().clone();
        let cancel = Arc::clone(&self.cancel);
        let chunksize = self.config.chunksize.max(1);
        let f = Arc::new(f);
        let (tx, rx) = unbounded::<(usize, R)>();

        // Submitter: drain the upstream iterator, batching jobs by
        // chunksize. Its tx clone drops on exit; each job's clone drops
        // after execution, so rx disconnects exactly when all work is done.
        std::thread::spawn(move || {
            let mut seq = 0usize;
            let mut chunk: Vec<(usize, T)> = Vec::with_capacity(chunksize);
            for item in inputs {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                chunk.push((seq, item));
                seq += 1;
                if chunk.len() >= chunksize {
                    let batch = std::mem::replace(&mut chunk, Vec::with_capacity(chunksize));
                    if submit(&injector, &f, &tx, &cancel, batch).is_err() {
                        return;
                    }
                }
            }
            if !chunk.is_empty() {
                let _ = submit(&injector, &f, &tx, &cancel, chunk);
            }
        });

        ResultStream {
            inner: StreamInner::Pool {
                rx,
                order: self.config.order,
                timeout: self.config.timeout,
                next_seq: 0,
                buffered: AHashMap::new(),
                disconnected: false,
            },
        }
    }

    /// Releases the worker pool. Idempotent; also invoked on drop.
    ///
    /// With `cancel_pending`, queued jobs are skipped rather than executed
    /// before the workers exit.
    pub fn shutdown(&mut self, cancel_pending: bool) {
        if cancel_pending {
            self.cancel.store(true, Ordering::Relaxed);
        }
        if let Some(pool) = self.pool.take() {
            drop(pool.injector);
            for worker in pool.workers {
                let _ = worker.join();
            }
        }
    }

    fn ensure_pool(&mut self) -> &Sender<Job> {
        let config = &self.config;
        let cancel = &self.cancel;
        let pool = self.pool.get_or_insert_with(|| {
            // A fresh pool clears any cancel left over from a prior
            // cancel_pending shutdown.
            cancel.store(false, Ordering::Relaxed);
            let workers = config.max_workers.unwrap_or_else(num_cpus::get).max(1);
            let (injector, job_rx) = unbounded::<Job>();
            let handles = (0..workers)
                .map(|i| {
                    let rx = job_rx.clone();
                    std::thread::Builder::new()
                        .name(format!("apksift-worker-{i}"))
                        .spawn(move || {
                            for job in rx.iter() {
                                job();
                            }
                        })
                        .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
                })
                .collect();
            Pool {
                injector,
                workers: handles,
            }
        });
        &pool.injector
    }
}

impl Drop for ConcurrentExecutor {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

fn submit<T, R, F>(
    injector: &Sender<Job>,
    f: &Arc<F>,
    tx: &Sender<(usize, R)>,
    cancel: &Arc<AtomicBool>,
    chunk: Vec<(usize, T)>,
) -> Result<(), crossbeam_channel::SendError<Job>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let f = Arc::clone(f);
    let tx = tx.clone();
    let cancel = Arc::clone(cancel);
    injector.send(Box::new(move || {
        for (seq, item) in chunk {
            if cancel.load(Ordering::Relaxed) {
                continue;
            }
            // The receiver may already be gone (stream dropped early).
            let _ = tx.send((seq, f(item)));
        }
    }))
}

/// Iterator over the results of one `map` call.
pub struct ResultStream<R> {
    inner: StreamInner<R>,
}

enum StreamInner<R> {
    Serial(Box<dyn Iterator<Item = R> + Send>),
    Pool {
        rx: Receiver<(usize, R)>,
        order: ResultsOrder,
        timeout: Option<Duration>,
        next_seq: usize,
        buffered: AHashMap<usize, R>,
        disconnected: bool,
    },
}

impl<R> StreamInner<R> {
    fn recv(
        rx: &Receiver<(usize, R)>,
        timeout: Option<Duration>,
    ) -> Result<(usize, R), RecvTimeoutError> {
        match timeout {
            Some(t) => rx.recv_timeout(t),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        }
    }
}

impl<R> Iterator for ResultStream<R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        match &mut self.inner {
            StreamInner::Serial(iter) => iter.next(),
            StreamInner::Pool {
                rx,
                order,
                timeout,
                next_seq,
                buffered,
                disconnected,
            } => loop {
                if *order == ResultsOrder::Submitted {
                    if let Some(r) = buffered.remove(next_seq) {
                        *next_seq += 1;
                        return Some(r);
                    }
                    if *disconnected {
                        // Gaps are jobs that were cancelled or dropped;
                        // drain whatever did arrive, in order.
                        let min = buffered.keys().min().copied()?;
                        *next_seq = min;
                        continue;
                    }
                } else if *disconnected {
                    return None;
                }

                match StreamInner::recv(rx, *timeout) {
                    Ok((seq, r)) => {
                        if *order == ResultsOrder::Submitted {
                            buffered.insert(seq, r);
                        } else {
                            return Some(r);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::warn!(
                            "job did not complete within {:?}; abandoning remaining results",
                            timeout.unwrap_or_default()
                        );
                        *disconnected = true;
                        if *order != ResultsOrder::Submitted {
                            return None;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        *disconnected = true;
                        if *order != ResultsOrder::Submitted {
                            return None;
                        }
                    }
                }
            },
        }
    }
}
