//! A reactor-style event loop library for Linux.
//!
//! Each [`EventLoop`] is a single-threaded reactor: an epoll-backed poller
//! dispatching readiness to per-descriptor [`Channel`]s, a timerfd-driven
//! timer pool, and a cross-thread task queue woken through an eventfd.
//! Parallelism comes from running sibling loops on dedicated threads with a
//! [`LoopPool`], in the usual single-acceptor / many-workers arrangement.
//!
//! # Example
//!
//! ```
//! use eddy_io::EventLoop;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new().unwrap();
//! let handle = event_loop.handle();
//!
//! // Runs on the loop thread 50 ms from now.
//! event_loop.run_after(Duration::from_millis(50), move || handle.quit());
//!
//! event_loop.run().unwrap();
//! ```
//!
//! Work can be pushed onto a loop from any thread through its
//! [`LoopHandle`]:
//!
//! ```
//! use eddy_io::LoopThread;
//!
//! let mut worker = LoopThread::new("worker", None);
//! let handle = worker.start_loop().unwrap();
//!
//! handle.queue_in_loop(|event_loop| {
//!     // Executed on the worker thread, with full access to its loop.
//!     assert!(event_loop.is_in_loop_thread());
//! });
//!
//! worker.quit_loop();
//! ```

pub mod sys;

mod channel;
mod event_loop;
mod loop_pool;
mod loop_thread;
mod poller;
mod ready;
mod signals;
mod thread;
mod timer;

pub use channel::Channel;
pub use event_loop::{EventLoop, LoopHandle};
pub use loop_pool::LoopPool;
pub use loop_thread::{LoopThread, ThreadInitCallback};
pub use ready::Ready;
pub use signals::Signals;
pub use thread::{CountDownLatch, Thread};
pub use timer::TimerId;
