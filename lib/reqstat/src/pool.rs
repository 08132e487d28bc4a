use crossbeam_channel as channel;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

// ============== Counting barrier ==============

/// Single-use counting barrier: waiters are released once the count reaches zero.
///
/// Never reset; each pass builds fresh instances.
pub struct CountdownLatch {
    count: AtomicUsize,
    lock: Mutex<()>,
    released: Condvar,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        Self { count: AtomicUsize::new(count), lock: Mutex::new(()), released: Condvar::new() }
    }

    /// Decrements the count; a latch already at zero stays at zero.
    pub fn count_down(&self) {
        let prev = self.count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        match prev {
            Ok(1) => {
                let _guard = self.lock.lock();
                self.released.notify_all();
            }
            Ok(_) => {}
            Err(_) => warn!("count_down on a released latch"),
        }
    }

    pub fn count(&self) -> usize { self.count.load(Ordering::SeqCst) }

    pub fn is_released(&self) -> bool { self.count() == 0 }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while !self.is_released() {
            self.released.wait(&mut guard);
        }
    }

    /// Blocks for at most `timeout`; returns whether the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.lock.lock();
        if !self.is_released() {
            let _ = self.released.wait_for(&mut guard, timeout);
        }
        self.is_released()
    }

    /// Guard that counts this latch down exactly once when dropped, including on unwind.
    pub fn arrive_on_drop(self: &Arc<Self>) -> LatchGuard {
        LatchGuard { latch: Arc::clone(self) }
    }
}

pub struct LatchGuard {
    latch: Arc<CountdownLatch>,
}

impl Drop for LatchGuard {
    fn drop(&mut self) { self.latch.count_down(); }
}

// ============== Worker Pool ==============

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of worker threads fed from an unbounded job queue.
///
/// `submit` never blocks the caller. A panicking job is logged and the worker keeps
/// serving the queue.
pub struct WorkerPool {
    sender: Option<channel::Sender<(String, Job)>>,
    handles: Vec<thread::JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::unbounded::<(String, Job)>();
        let mut handles = Vec::with_capacity(capacity);
        for id in 0..capacity {
            let rx = rx.clone();
            let handle = thread::Builder::new().name(format!("reqstat-worker-{}", id)).spawn(move || {
                for (name, job) in rx.iter() {
                    debug!(worker = id, task = %name, "task starting");
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                        error!(worker = id, task = %name, "task panicked");
                    }
                }
            })?;
            handles.push(handle);
        }
        Ok(Self { sender: Some(tx), handles, capacity })
    }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn submit<F>(&self, name: impl Into<String>, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        match &self.sender {
            Some(tx) => {
                if let Err(e) = tx.send((name, Box::new(job))) {
                    error!("worker pool submit failed: {}", e);
                }
            }
            None => error!(task = %name, "submit after shutdown"),
        }
    }

    /// Stops accepting work and blocks until every queued job has run.
    pub fn shutdown(mut self) { self.join_all(); }

    fn join_all(&mut self) {
        drop(self.sender.take());
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) { self.join_all(); }
}
