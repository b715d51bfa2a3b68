//! Worker pool used for chunk compression and decompression.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard,
    mpsc::{Receiver, SyncSender, sync_channel},
};
use std::thread::{self, JoinHandle};

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

/// A fixed size pool of worker threads.
///
/// Every submitted job carries the index it was submitted with. Results are collected
/// in completion order and sorted back into submission order by [ThreadPool::into_results],
/// so callers never observe the order in which workers finished.
pub struct ThreadPool<T: Send + 'static> {
    sender: Option<SyncSender<(usize, Job<T>)>>,
    workers: Vec<JoinHandle<()>>,
    results: Arc<Mutex<Vec<(usize, T)>>>,
    /// Number of pending jobs (queued + running)
    pending: Arc<AtomicUsize>,
    pending_pair: Arc<(Mutex<()>, Condvar)>,
    submitted: usize,
    size: usize,
}

#[derive(Debug)]
/// Error type for [ThreadPool::execute]
pub enum ExecuteError {
    /// Pool is closed
    Closed,
}

impl std::error::Error for ExecuteError {}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteError::Closed => write!(f, "ThreadPool is closed"),
        }
    }
}

impl<T: Send + 'static> ThreadPool<T> {
    /// Get the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Create a new thread pool with `size` workers.
    ///
    /// The submission channel is bounded to `size`, so [ThreadPool::execute] blocks while
    /// every worker is busy and the channel is full.
    pub fn new(size: usize, name: Option<&str>) -> Result<Self, std::io::Error> {
        if size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "worker size must be > 0",
            ));
        }

        let (tx, rx) = sync_channel::<(usize, Job<T>)>(size);
        let receiver: Arc<Mutex<Receiver<(usize, Job<T>)>>> = Arc::new(Mutex::new(rx));
        let results = Arc::new(Mutex::new(Vec::new()));
        let pending = Arc::new(AtomicUsize::new(0));
        let pending_pair = Arc::new((Mutex::new(()), Condvar::new()));
        let thread_name = name.unwrap_or("save-worker-");

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let rx_clone = Arc::clone(&receiver);
            let results_clone = Arc::clone(&results);
            let pending_clone = Arc::clone(&pending);
            let pending_pair_clone = Arc::clone(&pending_pair);

            let handle = thread::Builder::new()
                .name(format!("{}{}", thread_name, id))
                .spawn(move || {
                    loop {
                        let job = {
                            let guard = lock(&rx_clone);
                            guard.recv()
                        };
                        let Ok((index, job)) = job else {
                            // Sender dropped
                            break;
                        };
                        // A panicking job leaves no result, which run_ordered reports.
                        if let Ok(res) =
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
                        {
                            lock(&results_clone).push((index, res));
                        }
                        pending_clone.fetch_sub(1, Ordering::SeqCst);
                        let (lock_pair, cvar) = &*pending_pair_clone;
                        let _g = lock(lock_pair);
                        cvar.notify_all();
                    }
                })?;

            workers.push(handle);
        }

        Ok(ThreadPool {
            sender: Some(tx),
            workers,
            results,
            pending,
            pending_pair,
            submitted: 0,
            size,
        })
    }

    /// Submit a job. Blocks while the pool is saturated.
    ///
    /// Returns the index the result will be sorted under.
    pub fn execute<F>(&mut self, job: F) -> Result<usize, ExecuteError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let sender = match &self.sender {
            Some(s) => s,
            None => return Err(ExecuteError::Closed),
        };
        let index = self.submitted;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send((index, Box::new(job))).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecuteError::Closed);
        }
        self.submitted += 1;
        Ok(index)
    }

    /// Wait until all submitted jobs have completed.
    pub fn join(&self) {
        if self.pending.load(Ordering::SeqCst) == 0 {
            return;
        }

        let (lock_pair, cvar) = &*self.pending_pair;
        let mut guard = lock(lock_pair);
        while self.pending.load(Ordering::SeqCst) != 0 {
            guard = match cvar.wait(guard) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Wait for every job, then return the results in submission order.
    pub fn into_results(self) -> Vec<T> {
        self.join();
        let mut results = std::mem::take(&mut *lock(&self.results));
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, res)| res).collect()
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        // Closing the channel makes every worker leave its recv loop.
        self.sender.take();
        while let Some(handle) = self.workers.pop() {
            let _ = handle.join();
        }
    }
}

/// Run `jobs` on up to `workers` threads and return their results in input order.
///
/// Runs inline when there is a single job or a single worker.
pub fn run_ordered<T, F>(jobs: Vec<F>, workers: usize) -> anyhow::Result<Vec<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let workers = workers.min(jobs.len());
    if workers <= 1 {
        return Ok(jobs.into_iter().map(|job| job()).collect());
    }
    let count = jobs.len();
    let mut pool = ThreadPool::new(workers, None)?;
    for job in jobs {
        pool.execute(job)?;
    }
    let results = pool.into_results();
    if results.len() != count {
        return Err(anyhow::anyhow!(
            "Worker pool returned {} results for {} jobs",
            results.len(),
            count
        ));
    }
    Ok(results)
}

#[test]
fn test_results_keep_submission_order() {
    let jobs: Vec<_> = (0..16u64)
        .map(|i| {
            move || {
                // Later jobs finish first.
                std::thread::sleep(std::time::Duration::from_millis(16 - i));
                i * 10
            }
        })
        .collect();
    let results = run_ordered(jobs, 4).unwrap();
    assert_eq!(results, (0..16u64).map(|i| i * 10).collect::<Vec<_>>());
}

#[test]
fn test_single_worker_runs_inline() {
    let jobs: Vec<_> = [1, 2, 3].into_iter().map(|v| move || v).collect();
    assert_eq!(run_ordered(jobs, 1).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_zero_workers_rejected() {
    assert!(ThreadPool::<()>::new(0, None).is_err());
}
