use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use log::{error, trace};
use slab::Slab;

use crate::channel::Channel;
use crate::event_loop::Inner;
use crate::sys::TimerFd;

// The kernel rejects a zero relative expiration (it would disarm the timer),
// so a deadline already in the past is clamped to this floor.
const MIN_ARM_DELAY: Duration = Duration::from_micros(100);

static NEXT_SEQUENCE: AtomicI64 = AtomicI64::new(0);

/// Handle to a scheduled timer, used for cancellation.
///
/// The sequence number is assigned from a process-wide counter and never
/// reused, so a stale handle can always be told apart from a live one:
/// cancelling a timer that already fired (or was already cancelled) is a
/// silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    sequence: i64,
}

impl TimerId {
    pub(crate) fn next() -> TimerId {
        TimerId {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The process-unique sequence number behind this handle.
    pub fn sequence(&self) -> i64 {
        self.sequence
    }
}

pub(crate) struct Timer {
    when: Instant,
    interval: Option<Duration>,
    callback: Rc<RefCell<dyn FnMut()>>,
    sequence: i64,
}

impl Timer {
    pub(crate) fn new<F>(
        id: TimerId,
        when: Instant,
        interval: Option<Duration>,
        callback: F,
    ) -> Timer
    where
        F: FnMut() + 'static,
    {
        trace!(
            "timer sequence={} created, interval={:?}",
            id.sequence,
            interval
        );

        Timer {
            when,
            interval,
            callback: Rc::new(RefCell::new(callback)),
            sequence: id.sequence,
        }
    }
}

/// An ordered multiset of timers driven by one timerfd.
///
/// Storage is a slab arena; two indices order the live timers, one by
/// expiration for firing and one by sequence for cancellation. Both indices
/// always hold the same timers between mutations. All operations run on the
/// owning loop's thread.
pub(crate) struct TimerPool {
    timer_fd: TimerFd,
    channel: Rc<Channel>,

    arena: RefCell<Slab<Timer>>,
    /// Firing order: `(expiration, sequence)`; the sequence breaks ties, so
    /// two timers on the same deadline fire in creation order.
    by_expiration: RefCell<BTreeSet<(Instant, i64)>>,
    /// Cancellation index: sequence -> arena slot.
    by_identity: RefCell<BTreeMap<i64, usize>>,

    /// Sequences cancelled while their own firing pass is running; consulted
    /// before a repeating timer is rescheduled.
    canceling: RefCell<HashSet<i64>>,
    firing: Cell<bool>,
}

impl TimerPool {
    pub(crate) fn new(event_loop: Weak<Inner>, timer_fd: TimerFd) -> TimerPool {
        use std::os::unix::io::AsRawFd;

        let channel = Channel::new_internal(event_loop, timer_fd.as_raw_fd());

        TimerPool {
            timer_fd,
            channel,
            arena: RefCell::new(Slab::new()),
            by_expiration: RefCell::new(BTreeSet::new()),
            by_identity: RefCell::new(BTreeMap::new()),
            canceling: RefCell::new(HashSet::new()),
            firing: Cell::new(false),
        }
    }

    /// Hooks the timerfd channel into the loop. Called once the loop's inner
    /// state is fully constructed.
    pub(crate) fn setup(&self, event_loop: &Rc<Inner>) {
        let weak = Rc::downgrade(event_loop);
        self.channel.set_read_callback(move |_| {
            if let Some(event_loop) = weak.upgrade() {
                event_loop.timers().handle_read();
            }
        });
        self.channel.enable_read();
    }

    pub(crate) fn add(&self, timer: Timer) {
        debug_assert_eq!(
            self.by_expiration.borrow().len(),
            self.by_identity.borrow().len()
        );

        let when = timer.when;
        let sequence = timer.sequence;

        let earliest_changed = match self.by_expiration.borrow().first() {
            Some(&(head, _)) => when < head,
            None => true,
        };

        let slot = self.arena.borrow_mut().insert(timer);
        self.by_expiration.borrow_mut().insert((when, sequence));
        self.by_identity.borrow_mut().insert(sequence, slot);

        if earliest_changed {
            self.rearm(when);
        }
    }

    /// Cancels the timer behind `id`. Unknown or stale handles are ignored;
    /// a handle cancelled from inside its own callback is remembered so the
    /// firing pass will not reschedule it.
    pub(crate) fn cancel(&self, id: TimerId) {
        let sequence = id.sequence;

        let slot = self.by_identity.borrow_mut().remove(&sequence);
        match slot {
            Some(slot) => {
                let timer = self.arena.borrow_mut().remove(slot);
                let removed = self
                    .by_expiration
                    .borrow_mut()
                    .remove(&(timer.when, sequence));
                debug_assert!(removed);
                trace!("timer sequence={} cancelled", sequence);
            }
            None => {
                if self.firing.get() {
                    self.canceling.borrow_mut().insert(sequence);
                    trace!("timer sequence={} cancelled while firing", sequence);
                }
                // Otherwise the handle is stale; cancel is idempotent.
            }
        }

        debug_assert_eq!(
            self.by_expiration.borrow().len(),
            self.by_identity.borrow().len()
        );
    }

    /// Timerfd read handler: fires every expired timer in ascending
    /// expiration order, then reschedules the repeating survivors and
    /// re-arms the descriptor for the next deadline.
    pub(crate) fn handle_read(&self) {
        match self.timer_fd.read() {
            Ok(count) => trace!("timerfd fired, {} expirations", count),
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                // Raced with a re-arm; the deadlines are still honored.
            }
            Err(err) => error!("timerfd read failed: {}", err),
        }

        let now = Instant::now();

        // Move expired entries out of both indices. Arena slots stay
        // occupied so cancellation by sequence keeps working mid-fire.
        let mut expired: Vec<(i64, usize)> = Vec::new();
        {
            let mut by_expiration = self.by_expiration.borrow_mut();
            let mut by_identity = self.by_identity.borrow_mut();

            while let Some(&(when, sequence)) = by_expiration.first() {
                if when > now {
                    break;
                }
                by_expiration.pop_first();
                let slot = by_identity
                    .remove(&sequence)
                    .expect("timer indexed by expiration but not by identity");
                expired.push((sequence, slot));
            }
        }

        self.firing.set(true);
        self.canceling.borrow_mut().clear();

        for &(sequence, slot) in &expired {
            let callback = self.arena.borrow()[slot].callback.clone();
            // No pool borrow is held here: the callback may add or cancel
            // timers freely, including its own handle.
            let result = catch_unwind(AssertUnwindSafe(|| (&mut *callback.borrow_mut())()));
            if result.is_err() {
                error!("timer callback panicked (sequence={})", sequence);
            }
        }

        self.firing.set(false);

        // Reschedule repeating timers that were not cancelled mid-fire.
        {
            let canceling = self.canceling.borrow();
            let mut arena = self.arena.borrow_mut();
            let mut by_expiration = self.by_expiration.borrow_mut();
            let mut by_identity = self.by_identity.borrow_mut();

            for (sequence, slot) in expired {
                let interval = arena[slot].interval;
                match interval {
                    Some(interval) if !canceling.contains(&sequence) => {
                        let timer = &mut arena[slot];
                        timer.when = now + interval;
                        by_expiration.insert((timer.when, sequence));
                        by_identity.insert(sequence, slot);
                    }
                    _ => {
                        arena.remove(slot);
                        trace!("timer sequence={} retired", sequence);
                    }
                }
            }
        }

        let next = self.by_expiration.borrow().first().map(|&(when, _)| when);
        if let Some(when) = next {
            self.rearm(when);
        }
    }

    fn rearm(&self, when: Instant) {
        let delay = when
            .saturating_duration_since(Instant::now())
            .max(MIN_ARM_DELAY);

        if let Err(err) = self.timer_fd.arm(delay) {
            error!("timerfd arm failed: {}", err);
            panic!("failed to arm timerfd: {}", err);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let len = self.by_expiration.borrow().len();
        assert_eq!(len, self.by_identity.borrow().len());
        len
    }
}

impl Drop for TimerPool {
    fn drop(&mut self) {
        trace!(
            "timer pool dropped, {} timers live",
            self.by_identity.borrow().len()
        );
    }
}
