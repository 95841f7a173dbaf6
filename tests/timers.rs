use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eddy_io::{EventLoop, LoopThread, TimerId};

#[test]
fn timers_fire_in_deadline_order() {
    let event_loop = EventLoop::new().unwrap();
    let fired = Rc::new(RefCell::new(Vec::new()));

    // Scheduled latest-first to prove ordering comes from the deadline.
    let log = fired.clone();
    event_loop.run_after(Duration::from_millis(100), move || {
        log.borrow_mut().push(("a", Instant::now()));
    });
    let log = fired.clone();
    event_loop.run_after(Duration::from_millis(50), move || {
        log.borrow_mut().push(("b", Instant::now()));
    });

    let quitter = event_loop.clone();
    event_loop.run_after(Duration::from_millis(200), move || quitter.quit());
    event_loop.run().unwrap();

    let fired = fired.borrow();
    assert_eq!(fired.len(), 2);
    assert_eq!(fired[0].0, "b");
    assert_eq!(fired[1].0, "a");
    assert!(fired[0].1 <= fired[1].1);
}

#[test]
fn same_deadline_fires_in_creation_order() {
    let event_loop = EventLoop::new().unwrap();
    let fired = Rc::new(RefCell::new(Vec::new()));

    let when = Instant::now() + Duration::from_millis(50);
    let log = fired.clone();
    event_loop.run_at(when, move || log.borrow_mut().push("first"));
    let log = fired.clone();
    event_loop.run_at(when, move || log.borrow_mut().push("second"));

    let quitter = event_loop.clone();
    event_loop.run_after(Duration::from_millis(150), move || quitter.quit());
    event_loop.run().unwrap();

    assert_eq!(*fired.borrow(), vec!["first", "second"]);
}

#[test]
fn repeating_timer_cancelled_inside_its_own_callback() {
    let event_loop = EventLoop::new().unwrap();

    let count = Rc::new(Cell::new(0));
    let id: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));

    let calls = count.clone();
    let own_id = id.clone();
    let canceller = event_loop.clone();
    let assigned = event_loop.run_every(Duration::from_millis(10), move || {
        let fired = calls.get() + 1;
        calls.set(fired);
        if fired == 3 {
            // Cancelling the handle from inside its own callback: the pool
            // must not reschedule this round.
            canceller.cancel(own_id.get().unwrap());
        }
    });
    id.set(Some(assigned));

    let quitter = event_loop.clone();
    event_loop.run_after(Duration::from_millis(200), move || quitter.quit());
    event_loop.run().unwrap();

    assert_eq!(count.get(), 3);
}

#[test]
fn cancelled_timer_never_fires() {
    let event_loop = EventLoop::new().unwrap();

    let count = Rc::new(Cell::new(0));
    let calls = count.clone();
    let id = event_loop.run_after(Duration::from_millis(20), move || {
        calls.set(calls.get() + 1);
    });
    event_loop.cancel(id);

    let quitter = event_loop.clone();
    event_loop.run_after(Duration::from_millis(100), move || quitter.quit());
    event_loop.run().unwrap();

    assert_eq!(count.get(), 0);
}

#[test]
fn cancel_is_idempotent_after_expiry() {
    let event_loop = EventLoop::new().unwrap();

    let id = event_loop.run_after(Duration::from_millis(10), || {});
    let quitter = event_loop.clone();
    event_loop.run_after(Duration::from_millis(60), move || quitter.quit());
    event_loop.run().unwrap();

    // Fired and retired; both cancels are silent no-ops.
    event_loop.cancel(id);
    event_loop.cancel(id);
}

#[test]
fn repeating_timer_keeps_firing_until_cancelled_externally() {
    let mut worker = LoopThread::new("ticker", None);
    let handle = worker.start_loop().unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let calls = count.clone();
    let id = handle.run_every(Duration::from_millis(10), move || {
        calls.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(120));
    handle.cancel(id);
    std::thread::sleep(Duration::from_millis(30));

    let settled = count.load(Ordering::SeqCst);
    assert!(settled >= 3, "only {} ticks", settled);

    // No further callbacks after the cancel has been processed.
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(count.load(Ordering::SeqCst), settled);

    worker.quit_loop();
}

#[test]
fn timer_scheduled_from_foreign_thread_fires() {
    let mut worker = LoopThread::new("foreign-timer", None);
    let handle = worker.start_loop().unwrap();

    let fired = Arc::new(Mutex::new(None));
    let slot = fired.clone();
    let scheduled = Instant::now();
    handle.run_after(Duration::from_millis(30), move || {
        *slot.lock().unwrap() = Some(Instant::now());
    });

    std::thread::sleep(Duration::from_millis(200));

    let fired = fired.lock().unwrap().expect("timer never fired");
    let elapsed = fired.duration_since(scheduled);
    assert!(elapsed >= Duration::from_millis(25), "fired after {:?}", elapsed);

    worker.quit_loop();
}

#[test]
fn callback_may_schedule_more_timers() {
    let event_loop = EventLoop::new().unwrap();

    let count = Rc::new(Cell::new(0));
    let calls = count.clone();
    let chain = event_loop.clone();
    event_loop.run_after(Duration::from_millis(10), move || {
        calls.set(calls.get() + 1);
        let calls = calls.clone();
        chain.run_after(Duration::from_millis(10), move || {
            calls.set(calls.get() + 1);
        });
    });

    let quitter = event_loop.clone();
    event_loop.run_after(Duration::from_millis(100), move || quitter.quit());
    event_loop.run().unwrap();

    assert_eq!(count.get(), 2);
}
