use std::io;
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, error};

use crate::event_loop::{EventLoop, LoopHandle};
use crate::thread::Thread;

/// Callback run on a freshly built worker loop, before it starts polling.
pub type ThreadInitCallback = Arc<dyn Fn(&EventLoop) + Send + Sync>;

type PublishSlot = Arc<(Mutex<Option<io::Result<LoopHandle>>>, Condvar)>;

/// A named thread running its own event loop.
///
/// The loop is constructed on the child's stack; the parent receives a
/// [`LoopHandle`] once the child has published it, so by the time
/// [`start_loop`](LoopThread::start_loop) returns the loop is fully
/// initialised and about to poll.
pub struct LoopThread {
    thread: Thread,
    published: PublishSlot,
    handle: Option<LoopHandle>,
}

impl LoopThread {
    pub fn new(name: &str, init: Option<ThreadInitCallback>) -> LoopThread {
        let published: PublishSlot = Arc::new((Mutex::new(None), Condvar::new()));

        let publish = published.clone();
        let thread_name = name.to_string();
        let thread = Thread::new(
            move || {
                let event_loop = match EventLoop::new() {
                    Ok(event_loop) => event_loop,
                    Err(err) => {
                        error!("loop thread {} failed to build its loop: {}", thread_name, err);
                        let (slot, condvar) = &*publish;
                        *slot.lock().unwrap() = Some(Err(err));
                        condvar.notify_one();
                        return;
                    }
                };

                if let Some(init) = &init {
                    init(&event_loop);
                }

                {
                    let (slot, condvar) = &*publish;
                    *slot.lock().unwrap() = Some(Ok(event_loop.handle()));
                    condvar.notify_one();
                }

                if let Err(err) = event_loop.run() {
                    error!("loop thread {} terminated: {}", thread_name, err);
                }
            },
            name,
        );

        LoopThread {
            thread,
            published,
            handle: None,
        }
    }

    /// Spawns the thread and blocks until its loop is up, returning a handle
    /// to it.
    pub fn start_loop(&mut self) -> io::Result<LoopHandle> {
        assert!(
            !self.thread.has_start_been_attempted(),
            "loop thread {} started twice",
            self.thread.name()
        );

        self.thread.start();

        let (slot, condvar) = &*self.published;
        let mut published = slot.lock().unwrap();
        while published.is_none() {
            published = condvar.wait(published).unwrap();
        }

        match published.take().unwrap() {
            Ok(handle) => {
                self.handle = Some(handle.clone());
                Ok(handle)
            }
            Err(err) => Err(err),
        }
    }

    /// Quits the child loop and joins the thread. Idempotent.
    pub fn quit_loop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("quitting loop thread {}", self.thread.name());
            handle.quit();
        }

        if self.thread.has_start_been_attempted() && !self.thread.has_been_joined() {
            self.thread.join();
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.quit_loop();
    }
}

#[cfg(test)]
mod test {
    use super::LoopThread;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn start_loop_returns_a_live_handle() {
        let mut loop_thread = LoopThread::new("test-loop", None);
        let handle = loop_thread.start_loop().unwrap();

        let (sender, receiver) = mpsc::channel();
        handle.queue_in_loop(move |_| sender.send(()).unwrap());
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();

        loop_thread.quit_loop();
    }

    #[test]
    fn init_callback_runs_before_publication() {
        let ran = Arc::new(AtomicUsize::new(0));

        let flag = ran.clone();
        let mut loop_thread = LoopThread::new(
            "init-loop",
            Some(Arc::new(move |_| {
                flag.fetch_add(1, Ordering::SeqCst);
            })),
        );

        loop_thread.start_loop().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        loop_thread.quit_loop();
    }

    #[test]
    fn quit_loop_is_idempotent() {
        let mut loop_thread = LoopThread::new("quit-loop", None);
        loop_thread.start_loop().unwrap();

        loop_thread.quit_loop();
        loop_thread.quit_loop();
    }
}
