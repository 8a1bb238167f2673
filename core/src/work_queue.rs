//! Thread-safe FIFO work queue with blocking pop and graceful shutdown.
//!
//! [`WorkQueue`] carries opaque deferred work (boxed closures) from producer
//! threads to consumer threads. There is no priority and no cancellation of
//! queued items — a consumer that needs to skip work checks its own flags
//! inside the work body.
//!
//! [`WorkerThread`] is the standard consumer: a named OS thread that drains
//! a shared queue until it is closed.
//!
//! # Shutdown
//!
//! `close()` marks the queue closed and wakes every blocked `pop()`. Items
//! posted before (or even after) the close are still drained; `pop()` only
//! returns `None` once the queue is both closed and empty, so consumers
//! finish in-flight work before exiting.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use meshstream_core::{WorkQueue, WorkerThread};
//!
//! let queue = Arc::new(WorkQueue::new());
//! let worker = WorkerThread::spawn("upload-0", Arc::clone(&queue)).unwrap();
//!
//! queue.post(Box::new(|| println!("ran on the worker")));
//!
//! queue.close();
//! worker.join();
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// A unit of deferred work.
///
/// Panics inside a work item are not caught by the queue; they unwind the
/// consuming thread.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

struct QueueInner {
    items: VecDeque<WorkItem>,
    closed: bool,
}

/// Thread-safe FIFO task queue with blocking pop.
///
/// All operations are safe to call from any thread and none of them fail.
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl WorkQueue {
    /// Create a new, open, empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a unit of work and wake one waiting consumer.
    pub fn post(&self, work: WorkItem) {
        {
            let mut inner = self.inner.lock();
            inner.items.push_back(work);
        }
        self.available.notify_one();
    }

    /// Block until an item is available or the queue is closed.
    ///
    /// Returns `Some(front)` whenever an item is queued — including after
    /// `close()`, so remaining items drain. Returns `None` only when the
    /// queue is closed and empty.
    pub fn pop(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.closed {
            self.available.wait(&mut inner);
        }
        inner.items.pop_front()
    }

    /// Pop and execute one item, blocking until one is available.
    ///
    /// Returns `false` when the queue is closed and empty.
    pub fn run_one(&self) -> bool {
        match self.pop() {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Execute everything currently queued without blocking for more.
    ///
    /// Returns `true` if at least one item ran.
    pub fn run_pending(&self) -> bool {
        let mut ran = false;
        loop {
            let work = self.inner.lock().items.pop_front();
            match work {
                Some(work) => {
                    work();
                    ran = true;
                }
                None => return ran,
            }
        }
    }

    /// Pop and execute items until the queue is closed and drained.
    pub fn run_until_close(&self) {
        while let Some(work) = self.pop() {
            work();
        }
    }

    /// Mark the queue closed and wake all waiters. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.available.notify_all();
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Whether the queue is closed and fully drained.
    pub fn is_done(&self) -> bool {
        let inner = self.inner.lock();
        inner.closed && inner.items.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A named OS thread draining a shared [`WorkQueue`] until it closes.
///
/// The thread exits once the queue is closed and drained. Close the queue
/// before joining (or dropping) the worker, or the join blocks forever.
pub struct WorkerThread {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Spawn a worker thread with the given name.
    pub fn spawn(name: impl Into<String>, queue: Arc<WorkQueue>) -> std::io::Result<Self> {
        let name = name.into();
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                log::debug!("worker '{}' started", thread_name);
                queue.run_until_close();
                log::debug!("worker '{}' exiting", thread_name);
            })?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    /// The worker's thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the worker to exit.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.join_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_post_pop_fifo_order() {
        let queue = WorkQueue::new();
        let (tx, rx) = mpsc::channel();

        for i in 0..4 {
            let tx = tx.clone();
            queue.post(Box::new(move || tx.send(i).unwrap()));
        }
        assert_eq!(queue.len(), 4);

        queue.close();
        queue.run_until_close();

        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(queue.is_done());
    }

    #[test]
    fn test_close_wakes_blocked_pop() {
        let queue = Arc::new(WorkQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop().is_none())
        };

        // Give the popper a moment to block, then close.
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.close();
        assert!(popper.join().unwrap());
    }

    #[test]
    fn test_items_drain_after_close() {
        let queue = WorkQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            queue.post(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.close();

        // Posting after close still lands in the queue and drains.
        let counter_clone = Arc::clone(&counter);
        queue.post(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        queue.run_until_close();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_run_pending_does_not_block() {
        let queue = WorkQueue::new();
        assert!(!queue.run_pending());

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        queue.post(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(queue.run_pending());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_worker_thread_executes_posted_work() {
        let queue = Arc::new(WorkQueue::new());
        let worker = WorkerThread::spawn("test-worker", Arc::clone(&queue)).unwrap();
        assert_eq!(worker.name(), "test-worker");

        let (tx, rx) = mpsc::channel();
        queue.post(Box::new(move || tx.send(42u32).unwrap()));
        assert_eq!(rx.recv().unwrap(), 42);

        queue.close();
        worker.join();
        assert!(queue.is_done());
    }
}
