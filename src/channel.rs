use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Instant;

use log::trace;

use crate::event_loop::{EventLoop, Inner};
use crate::ready::Ready;

pub(crate) type ReadCallback = Box<dyn FnMut(Instant)>;
pub(crate) type EventCallback = Box<dyn FnMut()>;

/// Membership state of a channel inside its loop's poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelState {
    New,
    Added,
    Deleted,
}

/// Binds one descriptor to one event loop.
///
/// A `Channel` carries the interest mask registered with the poller and the
/// callbacks invoked when the descriptor becomes ready. It borrows the
/// descriptor: the caller keeps ownership and must keep it open for the
/// channel's lifetime, and must `disable_all` + `remove` the channel before
/// closing it.
///
/// All methods must be called from the owning loop's thread. A callback may
/// mutate the channel's interest freely, but must not replace its own
/// callback slot while it is running.
pub struct Channel {
    fd: RawFd,
    event_loop: Weak<Inner>,
    me: Weak<Channel>,

    events: Cell<Ready>,
    state: Cell<ChannelState>,

    read_callback: RefCell<Option<ReadCallback>>,
    write_callback: RefCell<Option<EventCallback>>,
    close_callback: RefCell<Option<EventCallback>>,
    error_callback: RefCell<Option<EventCallback>>,

    tie: RefCell<Option<Weak<dyn Any>>>,
}

impl Channel {
    /// Creates a channel for `fd` owned by `event_loop`.
    ///
    /// The channel is inert until a callback is installed and an `enable_*`
    /// call registers interest with the poller.
    pub fn new(event_loop: &EventLoop, fd: RawFd) -> Rc<Channel> {
        Channel::new_internal(Rc::downgrade(&event_loop.inner), fd)
    }

    pub(crate) fn new_internal(event_loop: Weak<Inner>, fd: RawFd) -> Rc<Channel> {
        trace!("channel fd={} created", fd);

        Rc::new_cyclic(|me| Channel {
            fd,
            event_loop,
            me: me.clone(),
            events: Cell::new(Ready::empty()),
            state: Cell::new(ChannelState::New),
            read_callback: RefCell::new(None),
            write_callback: RefCell::new(None),
            close_callback: RefCell::new(None),
            error_callback: RefCell::new(None),
            tie: RefCell::new(None),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn events(&self) -> Ready {
        self.events.get()
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.state.set(state);
    }

    pub fn set_read_callback<F>(&self, callback: F)
    where
        F: FnMut(Instant) + 'static,
    {
        *self.read_callback.borrow_mut() = Some(Box::new(callback));
    }

    pub fn set_write_callback<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        *self.write_callback.borrow_mut() = Some(Box::new(callback));
    }

    pub fn set_close_callback<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        *self.close_callback.borrow_mut() = Some(Box::new(callback));
    }

    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        *self.error_callback.borrow_mut() = Some(Box::new(callback));
    }

    /// Ties the channel to the object that owns its callbacks.
    ///
    /// At dispatch time the weak reference is upgraded first; if the owner is
    /// gone the whole dispatch is skipped, so callbacks never run against a
    /// destroyed receiver.
    pub fn tie<T: Any>(&self, owner: &Rc<T>) {
        let owner: Rc<dyn Any> = owner.clone();
        *self.tie.borrow_mut() = Some(Rc::downgrade(&owner));
    }

    pub fn enable_read(&self) {
        let mut events = self.events.get();
        events.insert(Ready::readable() | Ready::pri());
        self.events.set(events);
        self.update();
    }

    pub fn disable_read(&self) {
        let mut events = self.events.get();
        events.remove(Ready::readable() | Ready::pri());
        self.events.set(events);
        self.update();
    }

    pub fn enable_write(&self) {
        let mut events = self.events.get();
        events.insert(Ready::writable());
        self.events.set(events);
        self.update();
    }

    pub fn disable_write(&self) {
        let mut events = self.events.get();
        events.remove(Ready::writable());
        self.events.set(events);
        self.update();
    }

    pub fn disable_all(&self) {
        self.events.set(Ready::empty());
        self.update();
    }

    pub fn is_reading(&self) -> bool {
        self.events.get().is_readable()
    }

    pub fn is_writing(&self) -> bool {
        self.events.get().is_writable()
    }

    /// Deregisters the channel from its loop's poller. Interest must have
    /// been cleared with `disable_all` first.
    pub fn remove(&self) {
        assert!(
            self.events.get().is_empty(),
            "channel fd={} removed with live interest",
            self.fd
        );

        if self.state.get() == ChannelState::New {
            // Never reached the poller; nothing to deregister.
            return;
        }

        if let (Some(event_loop), Some(me)) = (self.event_loop.upgrade(), self.me.upgrade()) {
            event_loop.assert_in_loop();
            event_loop.poller().remove(&me);
        }
    }

    fn update(&self) {
        if let (Some(event_loop), Some(me)) = (self.event_loop.upgrade(), self.me.upgrade()) {
            event_loop.assert_in_loop();
            event_loop.poller().update(&me);
        }
    }

    /// Dispatches the readiness bits reported by the poller.
    ///
    /// Order: close on hang-up without pending input, then error, then read
    /// (with the poll-return timestamp), then write. A tied channel whose
    /// owner has been destroyed skips dispatch entirely.
    pub(crate) fn handle_event(&self, receive_time: Instant, revents: Ready) {
        let tie = self.tie.borrow().clone();
        match tie {
            Some(tie) => match tie.upgrade() {
                Some(_owner) => self.dispatch(receive_time, revents),
                None => {
                    trace!("channel fd={} owner gone, dispatch skipped", self.fd);
                }
            },
            None => self.dispatch(receive_time, revents),
        }
    }

    fn dispatch(&self, receive_time: Instant, revents: Ready) {
        trace!("channel fd={} handling {:?}", self.fd, revents);

        if revents.is_hup() && !revents.is_readable() {
            if let Some(callback) = self.close_callback.borrow_mut().as_mut() {
                callback();
            }
        }

        if revents.is_error() || revents.is_nval() {
            if let Some(callback) = self.error_callback.borrow_mut().as_mut() {
                callback();
            }
        }

        if revents.is_readable() || revents.is_pri() || revents.is_rdhup() {
            if let Some(callback) = self.read_callback.borrow_mut().as_mut() {
                callback(receive_time);
            }
        }

        if revents.is_writable() {
            if let Some(callback) = self.write_callback.borrow_mut().as_mut() {
                callback();
            }
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Channel")
            .field("fd", &self.fd)
            .field("events", &self.events.get())
            .field("state", &self.state.get())
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        trace!("channel fd={} dropped", self.fd);
    }
}
