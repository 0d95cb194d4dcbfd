//! Background job queue for prefetch work.
//!
//! Plain worker threads over a crossbeam channel; finished work comes back on
//! a second channel the owner drains once per frame with [`JobQueue::poll`].
//! Submitting never blocks, polling never blocks, and a cancelled job that
//! has not started yet is skipped entirely.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Monotonic identity of one submitted job. Consumers match completions
/// against the id they kept, so results from superseded jobs are cheap to
/// recognize and drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

/// Shared cancellation flag. Long work items poll it between steps; the
/// worker checks it once more before starting a job at all.
#[derive(Debug, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one submitted job: its identity plus its cancel flag.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    flag: CancelFlag,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn cancel(&self) {
        self.flag.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }
}

/// A finished job. `payload` is `None` when the job panicked; the worker has
/// already logged the panic message.
#[derive(Debug)]
pub struct Completion<T> {
    pub id: JobId,
    pub payload: Option<T>,
}

type Job<T> = (JobId, CancelFlag, Box<dyn FnOnce(&CancelFlag) -> T + Send>);

/// Fixed pool of detached worker threads. Dropping the queue closes the job
/// channel; workers finish what they pulled and exit on their own.
pub struct JobQueue<T> {
    submit_tx: Sender<Job<T>>,
    done_rx: Receiver<Completion<T>>,
    next_id: AtomicU64,
    workers: usize,
}

impl<T: Send + 'static> JobQueue<T> {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (submit_tx, submit_rx) = unbounded::<Job<T>>();
        let (done_tx, done_rx) = unbounded();
        for _ in 0..workers {
            let rx = submit_rx.clone();
            let tx = done_tx.clone();
            thread::spawn(move || worker_loop(rx, tx));
        }
        Self { submit_tx, done_rx, next_id: AtomicU64::new(1), workers }
    }

    /// Pool sized by [`default_workers`].
    pub fn with_default_workers() -> Self {
        Self::new(default_workers())
    }

    /// Queue a job. The closure receives the job's cancel flag so it can bail
    /// out between steps once [`JobHandle::cancel`] was called.
    pub fn submit<F>(&self, work: F) -> JobHandle
    where
        F: FnOnce(&CancelFlag) -> T + Send + 'static,
    {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let flag = CancelFlag::new();
        let handle = JobHandle { id, flag: flag.clone() };
        // Workers hold the receiver for as long as this sender exists.
        self.submit_tx
            .send((id, flag, Box::new(work)))
            .expect("job channel closed");
        handle
    }

    /// Drain every completion that has landed since the last poll.
    pub fn poll(&self) -> Vec<Completion<T>> {
        self.done_rx.try_iter().collect()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// One worker per core beyond the one running the frame, at least one.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

fn worker_loop<T: Send>(jobs: Receiver<Job<T>>, done: Sender<Completion<T>>) {
    while let Ok((id, flag, work)) = jobs.recv() {
        if flag.is_cancelled() {
            continue;
        }
        match catch_unwind(AssertUnwindSafe(|| work(&flag))) {
            Ok(payload) => {
                let _ = done.send(Completion { id, payload: Some(payload) });
            }
            Err(panic) => {
                tracing::warn!("background job {id:?} panicked: {}", panic_message(&panic));
                let _ = done.send(Completion { id, payload: None });
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// Poll until at least `want` completions arrived or a second passed.
    fn poll_until<T: Send + 'static>(queue: &JobQueue<T>, want: usize) -> Vec<Completion<T>> {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut out = Vec::new();
        while out.len() < want && Instant::now() < deadline {
            out.extend(queue.poll());
            thread::sleep(Duration::from_millis(2));
        }
        out
    }

    #[test]
    fn completes_submitted_jobs() {
        let queue = JobQueue::new(2);
        let a = queue.submit(|_| 7u32);
        let b = queue.submit(|_| 9u32);
        let done = poll_until(&queue, 2);
        assert_eq!(done.len(), 2);
        assert!(done.iter().any(|c| c.id == a.id() && c.payload == Some(7)));
        assert!(done.iter().any(|c| c.id == b.id() && c.payload == Some(9)));
    }

    #[test]
    fn cancelled_before_run_is_skipped() {
        let queue = JobQueue::new(1);
        let (gate_tx, gate_rx) = unbounded::<()>();

        // Occupy the single worker so the second job stays queued.
        let blocker = queue.submit(move |_| {
            let _ = gate_rx.recv();
            1u32
        });
        let doomed = queue.submit(|_| 2u32);
        doomed.cancel();
        gate_tx.send(()).unwrap();

        let done = poll_until(&queue, 1);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, blocker.id());

        // The cancelled job produces nothing at all.
        thread::sleep(Duration::from_millis(20));
        assert!(queue.poll().is_empty());
    }

    #[test]
    fn panic_is_contained() {
        let queue = JobQueue::new(1);
        let handle = queue.submit(|_| -> u32 { panic!("boom") });
        let done = poll_until(&queue, 1);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, handle.id());
        assert_eq!(done[0].payload, None);

        // The worker survives and keeps serving jobs.
        queue.submit(|_| 3u32);
        let done = poll_until(&queue, 1);
        assert_eq!(done[0].payload, Some(3));
    }

    #[test]
    fn flag_is_visible_inside_the_job() {
        let queue = JobQueue::new(1);
        let handle = queue.submit(|flag: &CancelFlag| flag.is_cancelled());
        let done = poll_until(&queue, 1);
        assert_eq!(done[0].payload, Some(false));
        drop(handle);
    }
}
