use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexMap;
use log::{error, trace};

use crate::channel::{Channel, ChannelState};
use crate::ready::Ready;
use crate::sys;

const EVENTS_CAPACITY: usize = 1024;

/// The per-loop readiness multiplexer.
///
/// Keeps the registry of channels keyed by descriptor and mirrors each
/// channel's interest mask into the kernel. Single-threaded: only the owning
/// loop touches it.
pub(crate) struct Poller {
    epoll: sys::Epoll,
    channels: RefCell<IndexMap<RawFd, Rc<Channel>>>,
    events: RefCell<sys::Events>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Poller> {
        Ok(Poller {
            epoll: sys::Epoll::new()?,
            channels: RefCell::new(IndexMap::new()),
            events: RefCell::new(sys::Events::with_capacity(EVENTS_CAPACITY)),
        })
    }

    /// Blocks up to `timeout_ms` (-1 forever, 0 non-blocking) and appends
    /// every ready channel, with the bits that fired, to `active`. Returns
    /// the time the kernel reported readiness. Interruption by a signal
    /// counts as an empty poll.
    pub(crate) fn poll(
        &self,
        timeout_ms: i32,
        active: &mut Vec<(Rc<Channel>, Ready)>,
    ) -> io::Result<Instant> {
        let mut events = self.events.borrow_mut();

        match self.epoll.wait(&mut events, timeout_ms) {
            Ok(()) => {}
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                return Ok(Instant::now());
            }
            Err(err) => return Err(err),
        }

        let receive_time = Instant::now();

        let channels = self.channels.borrow();
        for idx in 0..events.len() {
            let (fd, revents) = match events.get(idx) {
                Some(event) => event,
                None => break,
            };

            // A channel deregistered by an earlier callback in the same
            // iteration may still have a kernel event in flight; skip it.
            if let Some(channel) = channels.get(&fd) {
                active.push((channel.clone(), revents));
            } else {
                trace!("stale event for fd={}, dropped", fd);
            }
        }

        Ok(receive_time)
    }

    /// Synchronises the kernel with `channel`'s interest mask, walking the
    /// `New -> Added <-> Deleted` membership machine.
    pub(crate) fn update(&self, channel: &Rc<Channel>) {
        let fd = channel.fd();
        let events = channel.events();

        match channel.state() {
            ChannelState::New | ChannelState::Deleted => {
                if channel.state() == ChannelState::New {
                    let prev = self.channels.borrow_mut().insert(fd, channel.clone());
                    assert!(prev.is_none(), "fd={} registered twice", fd);
                } else {
                    debug_assert!(self.channels.borrow().contains_key(&fd));
                }

                channel.set_state(ChannelState::Added);
                if let Err(err) = self.epoll.add(fd, events) {
                    error!("epoll add fd={} failed: {}", fd, err);
                    panic!("poller failed to register fd={}: {}", fd, err);
                }
            }
            ChannelState::Added => {
                if events.is_empty() {
                    if let Err(err) = self.epoll.delete(fd) {
                        error!("epoll delete fd={} failed: {}", fd, err);
                    }
                    channel.set_state(ChannelState::Deleted);
                } else if let Err(err) = self.epoll.modify(fd, events) {
                    error!("epoll modify fd={} failed: {}", fd, err);
                    panic!("poller failed to update fd={}: {}", fd, err);
                }
            }
        }
    }

    /// Drops `channel` from the registry. Its interest must already be empty
    /// and it must currently be `Added` or `Deleted`.
    pub(crate) fn remove(&self, channel: &Rc<Channel>) {
        let fd = channel.fd();
        let state = channel.state();

        assert!(channel.events().is_empty());
        assert!(
            state == ChannelState::Added || state == ChannelState::Deleted,
            "fd={} removed while {:?}",
            fd,
            state
        );

        let removed = self.channels.borrow_mut().swap_remove(&fd);
        debug_assert!(removed.is_some());

        if state == ChannelState::Added {
            if let Err(err) = self.epoll.delete(fd) {
                error!("epoll delete fd={} failed: {}", fd, err);
            }
        }

        channel.set_state(ChannelState::New);
    }
}
