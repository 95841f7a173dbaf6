use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{error, warn};

/// A one-shot countdown synchronisation barrier.
///
/// Waiters block until `count_down` has been called `count` times.
pub struct CountDownLatch {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> CountDownLatch {
        CountDownLatch {
            count: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap()
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.condvar.notify_all();
            }
        }
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.condvar.wait(count).unwrap();
        }
    }

    /// Waits until the count reaches zero or `timeout` elapses. Returns true
    /// if the latch opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            let (guard, result) = self.condvar.wait_timeout(count, timeout).unwrap();
            count = guard;
            if result.timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// A named OS thread.
///
/// `start` blocks until the spawned thread has entered its body (recorded its
/// id and decremented the startup latch); `start_async` returns immediately.
/// A started thread must be joined before the wrapper is dropped. Panics
/// escaping the body are caught and logged so a worker cannot take the
/// process down silently.
pub struct Thread {
    name: String,
    func: Option<Box<dyn FnOnce() + Send + 'static>>,
    handle: Option<JoinHandle<()>>,
    latch: Arc<CountDownLatch>,
    tid: Arc<OnceLock<ThreadId>>,
    start_called: bool,
    started: bool,
    joined: bool,
}

impl Thread {
    pub fn new<F>(func: F, name: &str) -> Thread
    where
        F: FnOnce() + Send + 'static,
    {
        Thread {
            name: name.to_string(),
            func: Some(Box::new(func)),
            handle: None,
            latch: Arc::new(CountDownLatch::new(1)),
            tid: Arc::new(OnceLock::new()),
            start_called: false,
            started: false,
            joined: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The spawned thread's id; `None` until the thread has started.
    pub fn tid(&self) -> Option<ThreadId> {
        self.tid.get().copied()
    }

    pub fn has_been_started(&self) -> bool {
        self.started
    }

    pub fn has_been_joined(&self) -> bool {
        self.joined
    }

    pub fn has_start_been_attempted(&self) -> bool {
        self.start_called
    }

    /// Starts the thread and waits for it to enter its body.
    pub fn start(&mut self) {
        self.start_async();
        self.latch.wait();
        self.started = true;
    }

    /// Starts the thread without waiting for initialisation.
    pub fn start_async(&mut self) {
        assert!(!self.start_called, "thread {} started twice", self.name);
        self.start_called = true;

        let func = match self.func.take() {
            Some(func) => func,
            None => unreachable!("start guarded by start_called"),
        };
        let latch = self.latch.clone();
        let tid = self.tid.clone();
        let name = self.name.clone();

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _ = tid.set(thread::current().id());
                latch.count_down();

                if catch_unwind(AssertUnwindSafe(func)).is_err() {
                    error!("thread {} panicked", name);
                }
            });

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => panic!("failed to spawn thread {}: {}", self.name, err),
        }
    }

    pub fn join(&mut self) {
        assert!(
            self.start_called,
            "tried to join never-started thread {}",
            self.name
        );
        assert!(!self.joined, "thread {} joined twice", self.name);

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.joined = true;
        self.started = true;
    }

    /// Gives up the join handle; the thread runs on detached and the wrapper
    /// may be dropped freely.
    pub fn detach(&mut self) {
        self.handle = None;
        self.joined = true;
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.start_called && !self.joined {
            warn!("thread {} dropped without join, detaching", self.name);
        }
    }
}
