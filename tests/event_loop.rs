use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use eddy_io::LoopThread;

#[test]
fn foreign_wakeup_is_prompt() {
    let mut worker = LoopThread::new("wakeup", None);
    let handle = worker.start_loop().unwrap();

    // The loop is asleep in a 10 s poll; a queued closure must interrupt it
    // within one waker round-trip.
    thread::sleep(Duration::from_millis(50));

    let submitted = Instant::now();
    let (sender, receiver) = mpsc::channel();
    handle.queue_in_loop(move |_| {
        sender.send(Instant::now()).unwrap();
    });

    let executed = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    let latency = executed.duration_since(submitted);
    assert!(
        latency < Duration::from_millis(500),
        "wakeup took {:?}",
        latency
    );

    worker.quit_loop();
}

#[test]
fn closures_from_one_thread_run_in_submission_order() {
    let mut worker = LoopThread::new("ordering", None);
    let handle = worker.start_loop().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (sender, receiver) = mpsc::channel();

    for index in 0..100 {
        let order = order.clone();
        let done = if index == 99 {
            Some(sender.clone())
        } else {
            None
        };
        handle.queue_in_loop(move |_| {
            order.lock().unwrap().push(index);
            if let Some(done) = done {
                done.send(()).unwrap();
            }
        });
    }

    receiver.recv_timeout(Duration::from_secs(5)).unwrap();

    let order = order.lock().unwrap();
    assert_eq!(*order, (0..100).collect::<Vec<_>>());

    worker.quit_loop();
}

#[test]
fn closure_runs_exactly_once_on_loop_thread() {
    let mut worker = LoopThread::new("once", None);
    let handle = worker.start_loop().unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let (sender, receiver) = mpsc::channel();

    let calls = count.clone();
    handle.queue_in_loop(move |event_loop| {
        assert!(event_loop.is_in_loop_thread());
        calls.fetch_add(1, Ordering::SeqCst);
        sender.send(()).unwrap();
    });

    receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    worker.quit_loop();
}

#[test]
fn closure_queued_by_closure_runs_in_a_later_drain() {
    let mut worker = LoopThread::new("requeue", None);
    let handle = worker.start_loop().unwrap();

    let (sender, receiver) = mpsc::channel();

    let relay = handle.clone();
    handle.queue_in_loop(move |_| {
        // Queued mid-drain: must not wait for the 10 s poll timeout.
        relay.queue_in_loop(move |_| {
            sender.send(Instant::now()).unwrap();
        });
    });

    let submitted = Instant::now();
    let executed = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(executed.duration_since(submitted) < Duration::from_millis(500));

    worker.quit_loop();
}

#[test]
fn quit_from_foreign_thread_stops_the_loop() {
    let mut worker = LoopThread::new("quitter", None);
    let handle = worker.start_loop().unwrap();

    thread::sleep(Duration::from_millis(20));

    let begun = Instant::now();
    handle.quit();
    worker.quit_loop();

    assert!(begun.elapsed() < Duration::from_secs(2));
}

#[test]
fn queued_closure_still_runs_when_quit_races_it() {
    let mut worker = LoopThread::new("late", None);
    let handle = worker.start_loop().unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let calls = count.clone();
    handle.queue_in_loop(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
    });
    handle.quit();

    worker.quit_loop();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
