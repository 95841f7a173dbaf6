use std::io;

use log::debug;

use crate::event_loop::{EventLoop, LoopHandle};
use crate::loop_thread::{LoopThread, ThreadInitCallback};

/// A fixed-size pool of sibling event loops on dedicated threads.
///
/// Owned by a base loop (typically the acceptor's) and used from that loop's
/// thread: `start(n)` spawns `n` workers, and connections are parcelled out
/// with [`next_loop`] (round-robin) or [`loop_for_hash`] (sticky). With zero
/// workers every pick falls back to the base loop, so single-threaded
/// servers need no special casing.
///
/// [`next_loop`]: LoopPool::next_loop
/// [`loop_for_hash`]: LoopPool::loop_for_hash
pub struct LoopPool {
    base: EventLoop,
    name: String,
    threads: Vec<LoopThread>,
    loops: Vec<LoopHandle>,
    next: usize,
    started: bool,
}

impl LoopPool {
    pub fn new(base: &EventLoop, name: &str) -> LoopPool {
        LoopPool {
            base: base.clone(),
            name: name.to_string(),
            threads: Vec::new(),
            loops: Vec::new(),
            next: 0,
            started: false,
        }
    }

    /// Spawns `num_loops` worker threads, each running a fresh loop, and
    /// blocks until every worker has published its handle. `init` runs on
    /// each worker loop before it starts polling; with zero workers it runs
    /// on the base loop instead, right here.
    pub fn start(&mut self, num_loops: usize, init: Option<ThreadInitCallback>) -> io::Result<()> {
        assert!(!self.started, "loop pool {} started twice", self.name);
        self.base.assert_in_loop();
        self.started = true;

        for index in 0..num_loops {
            let name = format!("{}{}", self.name, index);
            let mut thread = LoopThread::new(&name, init.clone());
            let handle = thread.start_loop()?;

            self.threads.push(thread);
            self.loops.push(handle);
        }

        debug!("loop pool {} started with {} workers", self.name, num_loops);

        if num_loops == 0 {
            if let Some(init) = init {
                init(&self.base);
            }
        }

        Ok(())
    }

    /// Picks the next worker loop round-robin; the base loop if the pool has
    /// no workers.
    pub fn next_loop(&mut self) -> LoopHandle {
        self.base.assert_in_loop();
        assert!(self.started, "loop pool {} not started", self.name);

        if self.loops.is_empty() {
            return self.base.handle();
        }

        let handle = self.loops[self.next].clone();
        self.next += 1;
        if self.next >= self.loops.len() {
            self.next = 0;
        }
        handle
    }

    /// Picks a worker by hash, so equal hashes stick to the same loop.
    pub fn loop_for_hash(&self, hash: usize) -> LoopHandle {
        self.base.assert_in_loop();

        if self.loops.is_empty() {
            self.base.handle()
        } else {
            self.loops[hash % self.loops.len()].clone()
        }
    }

    /// Snapshot of the pool's loops; just the base loop when there are no
    /// workers.
    pub fn all_loops(&self) -> Vec<LoopHandle> {
        self.base.assert_in_loop();
        assert!(self.started, "loop pool {} not started", self.name);

        if self.loops.is_empty() {
            vec![self.base.handle()]
        } else {
            self.loops.clone()
        }
    }

    /// Quits every worker loop and joins its thread. Each quit raises the
    /// worker's waker, so shutdown completes within one poll cycle per
    /// worker.
    pub fn stop(&mut self) {
        for thread in &mut self.threads {
            thread.quit_loop();
        }
        self.threads.clear();
        self.loops.clear();
        self.next = 0;

        if self.started {
            debug!("loop pool {} stopped", self.name);
        }
        self.started = false;
    }
}

impl Drop for LoopPool {
    fn drop(&mut self) {
        self.stop();
    }
}
