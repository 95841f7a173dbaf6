//! Whole-pool shutdown and descriptor accounting.
//!
//! Runs without the libtest harness so no other test can open or close
//! descriptors while the counts are taken.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eddy_io::{EventLoop, LoopPool};

fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

fn main() {
    env_logger::init();

    let baseline = open_fd_count();

    {
        let base = EventLoop::new().unwrap();
        let mut pool = LoopPool::new(&base, "shutdown");
        pool.start(4, None).unwrap();

        // Every worker does some work before the teardown.
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let calls = count.clone();
            pool.next_loop().queue_in_loop(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 8 {
            assert!(Instant::now() < deadline, "workers never drained the tasks");
            std::thread::sleep(Duration::from_millis(10));
        }

        // Each quit raises the worker's waker; the joins must not wait out
        // a poll timeout.
        let begun = Instant::now();
        pool.stop();
        assert!(
            begun.elapsed() < Duration::from_secs(2),
            "pool stop took {:?}",
            begun.elapsed()
        );
    }

    // Loops, pollers, wakers and timer descriptors are all closed.
    assert_eq!(open_fd_count(), baseline, "descriptors leaked");

    println!("ok - shutdown");
}
