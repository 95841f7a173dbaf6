use std::cell::{Cell, RefCell};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use concurrent_queue::ConcurrentQueue;
use log::{debug, error, trace};

use crate::channel::Channel;
use crate::poller::Poller;
use crate::ready::Ready;
use crate::sys::{EventFd, TimerFd};
use crate::timer::{Timer, TimerId, TimerPool};

// Upper bound on one poll sleep. The waker normally interrupts the sleep
// immediately; the timeout bounds quit latency if a wakeup is ever lost.
const POLL_TIMEOUT_MS: i32 = 10_000;

type Task = Box<dyn FnOnce(&EventLoop) + Send>;

/// State shared with foreign threads through [`LoopHandle`].
pub(crate) struct Shared {
    pending: ConcurrentQueue<Task>,
    calling_pending: AtomicBool,
    quit: AtomicBool,
    owner: ThreadId,
    wake: EventFd,
}

impl Shared {
    fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn wakeup(&self) {
        if let Err(err) = self.wake.write(1) {
            // A saturated counter is already a pending wakeup.
            if err.kind() != io::ErrorKind::WouldBlock {
                error!("waker write failed: {}", err);
            }
        }
    }

    fn push(&self, task: Task) {
        if self.pending.push(task).is_err() {
            error!("pending queue rejected a task; loop is gone");
        }

        if !self.is_in_loop_thread() || self.calling_pending.load(Ordering::SeqCst) {
            self.wakeup();
        }
    }
}

pub(crate) struct Inner {
    shared: Arc<Shared>,
    poller: Poller,
    timers: TimerPool,
    wake_channel: Rc<Channel>,
    active: RefCell<Vec<(Rc<Channel>, Ready)>>,
    looping: Cell<bool>,
}

impl Inner {
    pub(crate) fn poller(&self) -> &Poller {
        &self.poller
    }

    pub(crate) fn timers(&self) -> &TimerPool {
        &self.timers
    }

    pub(crate) fn assert_in_loop(&self) {
        assert!(
            self.shared.is_in_loop_thread(),
            "event loop owned by {:?} touched from {:?}",
            self.shared.owner,
            thread::current().id()
        );
    }
}

/// A single-threaded reactor.
///
/// The loop owns a poller, a timer pool and a pending-task queue, and drives
/// them from the thread that created it. Work arrives three ways: readiness
/// callbacks on registered [`Channel`]s, timer callbacks, and closures
/// submitted with [`run_in_loop`]/[`queue_in_loop`] — from this thread or,
/// through a [`LoopHandle`], from any other.
///
/// Cloning is shallow; clones refer to the same loop.
///
/// # Example
///
/// ```
/// use eddy_io::EventLoop;
/// use std::time::Duration;
///
/// let event_loop = EventLoop::new().unwrap();
/// let handle = event_loop.handle();
///
/// event_loop.run_after(Duration::from_millis(10), move || handle.quit());
/// event_loop.run().unwrap();
/// ```
///
/// [`run_in_loop`]: EventLoop::run_in_loop
/// [`queue_in_loop`]: EventLoop::queue_in_loop
#[derive(Clone)]
pub struct EventLoop {
    pub(crate) inner: Rc<Inner>,
}

impl EventLoop {
    /// Creates a loop owned by the calling thread. Only this thread may call
    /// [`run`](EventLoop::run).
    pub fn new() -> io::Result<EventLoop> {
        let shared = Arc::new(Shared {
            pending: ConcurrentQueue::unbounded(),
            calling_pending: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            owner: thread::current().id(),
            wake: EventFd::new()?,
        });

        let poller = Poller::new()?;
        let timer_fd = TimerFd::new()?;
        let wake_fd = {
            use std::os::unix::io::AsRawFd;
            shared.wake.as_raw_fd()
        };

        let inner = Rc::new_cyclic(|me| Inner {
            wake_channel: Channel::new_internal(me.clone(), wake_fd),
            timers: TimerPool::new(me.clone(), timer_fd),
            shared: shared.clone(),
            poller,
            active: RefCell::new(Vec::new()),
            looping: Cell::new(false),
        });

        // Registration has to wait until `inner` exists: enabling interest
        // walks back into the poller through the loop reference.
        let drain = shared.clone();
        inner.wake_channel.set_read_callback(move |_| {
            if let Err(err) = drain.wake.read() {
                if err.kind() != io::ErrorKind::WouldBlock {
                    error!("waker drain failed: {}", err);
                }
            }
        });
        inner.wake_channel.enable_read();
        inner.timers.setup(&inner);

        trace!("event loop created on {:?}", shared.owner);

        Ok(EventLoop { inner })
    }

    /// A cloneable, `Send` handle for submitting work from other threads.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: self.inner.shared.clone(),
        }
    }

    pub fn is_in_loop_thread(&self) -> bool {
        self.inner.shared.is_in_loop_thread()
    }

    /// Aborts if the calling thread is not the loop's owner.
    pub fn assert_in_loop(&self) {
        self.inner.assert_in_loop();
    }

    /// Runs the loop until [`quit`](EventLoop::quit).
    ///
    /// Each iteration polls for readiness, dispatches every active channel,
    /// then drains the closures pending at the start of the drain — so
    /// events observed by one poll are handled before any closure they
    /// enqueue, which in turn runs before the next poll.
    pub fn run(&self) -> io::Result<()> {
        self.assert_in_loop();
        assert!(!self.inner.looping.get(), "loop entered twice");

        self.inner.looping.set(true);
        debug!("event loop started");

        while !self.inner.shared.quit.load(Ordering::SeqCst) {
            let mut active = self.inner.active.take();
            active.clear();

            let receive_time = match self.inner.poller.poll(POLL_TIMEOUT_MS, &mut active) {
                Ok(receive_time) => receive_time,
                Err(err) => {
                    error!("poll failed: {}", err);
                    self.inner.looping.set(false);
                    return Err(err);
                }
            };

            for (channel, revents) in active.iter() {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    channel.handle_event(receive_time, *revents)
                }));
                if result.is_err() {
                    error!("channel fd={} callback panicked", channel.fd());
                }
            }

            self.inner.active.replace(active);
            self.do_pending_tasks();
        }

        // quit may have landed before the first poll or between a drain and
        // the loop check; one final drain keeps the guarantee that a queued
        // closure runs on this thread before the loop exits.
        self.do_pending_tasks();

        self.inner.shared.quit.store(false, Ordering::SeqCst);
        self.inner.looping.set(false);
        debug!("event loop stopped");

        Ok(())
    }

    /// Asks the loop to exit after the current iteration. Safe from channel,
    /// timer and pending-task callbacks; foreign threads should quit through
    /// a [`LoopHandle`].
    pub fn quit(&self) {
        self.inner.shared.quit.store(true, Ordering::SeqCst);

        if !self.is_in_loop_thread() || self.inner.shared.calling_pending.load(Ordering::SeqCst) {
            self.inner.shared.wakeup();
        }
    }

    /// Runs `task` now if called outside the pending-task drain, otherwise
    /// enqueues it for the next drain.
    pub fn run_in_loop<F>(&self, task: F)
    where
        F: FnOnce(&EventLoop) + Send + 'static,
    {
        if self.is_in_loop_thread() && !self.inner.shared.calling_pending.load(Ordering::SeqCst) {
            task(self);
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Appends `task` to the pending queue; it runs in the drain step of the
    /// current (or next) iteration.
    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce(&EventLoop) + Send + 'static,
    {
        self.inner.shared.push(Box::new(task));
    }

    /// Schedules `callback` at the absolute instant `when`.
    pub fn run_at<F>(&self, when: Instant, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        self.schedule(when, None, callback)
    }

    /// Schedules `callback` once, `delay` from now.
    pub fn run_after<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        self.schedule(Instant::now() + delay, None, callback)
    }

    /// Schedules `callback` every `interval`, first firing one interval from
    /// now.
    pub fn run_every<F>(&self, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        self.schedule(Instant::now() + interval, Some(interval), callback)
    }

    /// Cancels the timer behind `id`. Idempotent; safe from inside the
    /// timer's own callback.
    pub fn cancel(&self, id: TimerId) {
        self.assert_in_loop();
        self.inner.timers.cancel(id);
    }

    fn schedule<F>(&self, when: Instant, interval: Option<Duration>, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        self.assert_in_loop();
        let id = TimerId::next();
        self.inner.timers.add(Timer::new(id, when, interval, callback));
        id
    }

    fn do_pending_tasks(&self) {
        self.inner
            .shared
            .calling_pending
            .store(true, Ordering::SeqCst);

        // Only the tasks visible now: a task queued by a task runs in the
        // next iteration (its push raises the waker while calling_pending is
        // set, so the next poll returns immediately).
        let batch = self.inner.shared.pending.len();
        for _ in 0..batch {
            let task = match self.inner.shared.pending.pop() {
                Ok(task) => task,
                Err(_) => break,
            };
            if catch_unwind(AssertUnwindSafe(|| task(self))).is_err() {
                error!("pending task panicked");
            }
        }

        self.inner
            .shared
            .calling_pending
            .store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn poller_for_test(&self) -> &Poller {
        &self.inner.poller
    }

    #[cfg(test)]
    pub(crate) fn timers_for_test(&self) -> &TimerPool {
        &self.inner.timers
    }
}

/// A `Send + Sync` handle to an [`EventLoop`] living on another thread.
///
/// Submitted closures always go through the pending queue (the loop state
/// itself is single-threaded); the waker guarantees the loop notices them
/// within one poll cycle.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub fn is_in_loop_thread(&self) -> bool {
        self.shared.is_in_loop_thread()
    }

    /// True if `self` and `other` refer to the same loop.
    pub fn same_loop(&self, other: &LoopHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Enqueues `task`; it runs on the loop thread, in submission order
    /// relative to other tasks from this thread.
    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce(&EventLoop) + Send + 'static,
    {
        self.shared.push(Box::new(task));
    }

    /// Same as [`queue_in_loop`](LoopHandle::queue_in_loop): from a foreign
    /// handle every submission is queued.
    pub fn run_in_loop<F>(&self, task: F)
    where
        F: FnOnce(&EventLoop) + Send + 'static,
    {
        self.queue_in_loop(task);
    }

    /// Asks the loop to exit; wakes it if needed.
    pub fn quit(&self) {
        self.shared.quit.store(true, Ordering::SeqCst);

        if !self.shared.is_in_loop_thread()
            || self.shared.calling_pending.load(Ordering::SeqCst)
        {
            self.shared.wakeup();
        }
    }

    /// Schedules `callback` at the absolute instant `when`.
    pub fn run_at<F>(&self, when: Instant, callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule(when, None, callback)
    }

    /// Schedules `callback` once, `delay` from now.
    pub fn run_after<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule(Instant::now() + delay, None, callback)
    }

    /// Schedules `callback` every `interval`, first firing one interval from
    /// now.
    pub fn run_every<F>(&self, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule(Instant::now() + interval, Some(interval), callback)
    }

    /// Cancels the timer behind `id`. Idempotent.
    pub fn cancel(&self, id: TimerId) {
        self.queue_in_loop(move |event_loop| event_loop.inner.timers.cancel(id));
    }

    fn schedule<F>(&self, when: Instant, interval: Option<Duration>, callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        // The sequence is assigned here so the handle can be returned
        // without waiting for the loop thread.
        let id = TimerId::next();
        self.queue_in_loop(move |event_loop| {
            event_loop
                .inner
                .timers
                .add(Timer::new(id, when, interval, callback));
        });
        id
    }
}
