use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use libc::c_int;
use log::{debug, error, trace};

use crate::channel::Channel;
use crate::event_loop::{EventLoop, LoopHandle};
use crate::sys::{self, SigSet, SignalFd};

// One dispatcher per process: signal disposition is process-global state.
static DISPATCHER_ALIVE: AtomicBool = AtomicBool::new(false);

type SignalCallback = Box<dyn FnMut()>;

/// The process-wide signal dispatcher.
///
/// Routes signals through a signalfd registered with one chosen loop, so
/// callbacks run on that loop's thread like any other event. Watched signals
/// are blocked for the loop thread (and every thread it spawns afterwards);
/// removing a signal unblocks it, restoring the default disposition.
///
/// Only one dispatcher may exist at a time; constructing a second one fails.
pub struct Signals {
    inner: Rc<SignalsInner>,
}

struct SignalsInner {
    signal_fd: SignalFd,
    channel: Rc<Channel>,
    handle: LoopHandle,
    mask: RefCell<SigSet>,
    callbacks: RefCell<HashMap<c_int, SignalCallback>>,
}

impl Signals {
    /// Installs the dispatcher on `event_loop`. Must be called on the loop's
    /// thread; fails with `AlreadyExists` if a dispatcher is already
    /// installed anywhere in the process.
    pub fn new(event_loop: &EventLoop) -> io::Result<Signals> {
        event_loop.assert_in_loop();

        if DISPATCHER_ALIVE.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "signal dispatcher already installed",
            ));
        }

        let signal_fd = match SignalFd::new() {
            Ok(signal_fd) => signal_fd,
            Err(err) => {
                DISPATCHER_ALIVE.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        let channel = Channel::new(event_loop, signal_fd.as_raw_fd());
        let inner = Rc::new(SignalsInner {
            signal_fd,
            channel,
            handle: event_loop.handle(),
            mask: RefCell::new(SigSet::empty()),
            callbacks: RefCell::new(HashMap::new()),
        });

        let weak = Rc::downgrade(&inner);
        inner.channel.set_read_callback(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_read();
            }
        });
        inner.channel.tie(&inner);
        inner.channel.enable_read();

        trace!("signal dispatcher installed, fd={}", inner.channel.fd());

        Ok(Signals { inner })
    }

    /// Registers `callback` for `signo`; the signal is blocked for this
    /// thread and watched through the signalfd. Registering an already
    /// watched signal just replaces the callback.
    pub fn add<F>(&self, signo: c_int, callback: F) -> io::Result<()>
    where
        F: FnMut() + 'static,
    {
        assert!(self.inner.handle.is_in_loop_thread());

        {
            let mut mask = self.inner.mask.borrow_mut();
            if !mask.contains(signo) {
                mask.add(signo);
                sys::signalfd::block_signal(signo)?;
                self.inner.signal_fd.set_mask(&mask)?;
                debug!("signal {} now watched", signo);
            }
        }

        self.inner
            .callbacks
            .borrow_mut()
            .insert(signo, Box::new(callback));
        Ok(())
    }

    /// Stops watching `signo` and unblocks it, restoring the default
    /// disposition. Unknown signals are ignored.
    pub fn remove(&self, signo: c_int) -> io::Result<()> {
        assert!(self.inner.handle.is_in_loop_thread());

        {
            let mut mask = self.inner.mask.borrow_mut();
            if !mask.contains(signo) {
                return Ok(());
            }
            mask.del(signo);
            self.inner.signal_fd.set_mask(&mask)?;
            sys::signalfd::unblock_signal(signo)?;
        }

        self.inner.callbacks.borrow_mut().remove(&signo);
        debug!("signal {} no longer watched", signo);
        Ok(())
    }

    /// Removes every watched signal.
    pub fn clear(&self) -> io::Result<()> {
        let watched: Vec<c_int> = self.inner.callbacks.borrow().keys().copied().collect();
        for signo in watched {
            self.remove(signo)?;
        }
        Ok(())
    }
}

impl SignalsInner {
    fn handle_read(&self) {
        loop {
            let info = match self.signal_fd.read() {
                Ok(info) => info,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("signalfd read failed: {}", err);
                    break;
                }
            };

            let signo = info.ssi_signo as c_int;
            trace!("signal {} delivered", signo);

            // The callback is taken out for the call so it may itself add or
            // remove registrations; it goes back unless the call replaced it
            // or deregistered the signal.
            let callback = self.callbacks.borrow_mut().remove(&signo);
            match callback {
                Some(mut callback) => {
                    callback();
                    if self.mask.borrow().contains(signo) {
                        self.callbacks.borrow_mut().entry(signo).or_insert(callback);
                    }
                }
                None => debug!("signal {} has no callback, dropped", signo),
            }
        }
    }
}

impl Drop for Signals {
    fn drop(&mut self) {
        if let Err(err) = self.clear() {
            error!("signal dispatcher teardown failed: {}", err);
        }

        self.inner.channel.disable_all();
        self.inner.channel.remove();

        DISPATCHER_ALIVE.store(false, Ordering::SeqCst);
        trace!("signal dispatcher removed");
    }
}
