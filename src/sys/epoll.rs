use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use libc::{self, c_int};
use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::ready::Ready;

/// Thin wrapper around an epoll instance.
///
/// Registrations are keyed by raw descriptor and always level-triggered; the
/// descriptor itself rides in the kernel event payload, so whoever drains
/// [`Events`] can map it back to its owner.
pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;

        Ok(Epoll { epfd })
    }

    /// Blocks for up to `timeout_ms` milliseconds (-1 blocks forever, 0 does
    /// not block) and fills `events` with whatever the kernel reports.
    pub fn wait(&self, events: &mut Events, timeout_ms: i32) -> io::Result<()> {
        let cnt = syscall!(epoll_wait(
            self.epfd,
            events.events.as_mut_ptr(),
            events.events.capacity() as i32,
            timeout_ms
        ))?;

        unsafe { events.events.set_len(cnt as usize) };

        Ok(())
    }

    pub fn add(&self, fd: RawFd, interest: Ready) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: fd as u64,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;

        Ok(())
    }

    pub fn modify(&self, fd: RawFd, interest: Ready) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: fd as u64,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;

        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;

        Ok(())
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

fn interest_to_epoll(interest: Ready) -> u32 {
    let mut kind = 0;

    // EPOLLRDHUP must be asked for explicitly; ERR and HUP are implicit.
    if interest.is_readable() {
        kind |= EPOLLIN | EPOLLRDHUP;
    }

    if interest.is_pri() {
        kind |= EPOLLPRI;
    }

    if interest.is_writable() {
        kind |= EPOLLOUT;
    }

    kind as u32
}

fn epoll_to_ready(epoll: c_int) -> Ready {
    let mut kind = Ready::empty();

    if (epoll & EPOLLIN) != 0 {
        kind |= Ready::readable();
    }

    if (epoll & EPOLLPRI) != 0 {
        kind |= Ready::pri();
    }

    if (epoll & EPOLLOUT) != 0 {
        kind |= Ready::writable();
    }

    if (epoll & EPOLLERR) != 0 {
        kind |= Ready::error();
    }

    if (epoll & EPOLLHUP) != 0 {
        kind |= Ready::hup();
    }

    if (epoll & EPOLLRDHUP) != 0 {
        kind |= Ready::rdhup();
    }

    kind
}

/// A reusable buffer of kernel events filled by [`Epoll::wait`].
pub struct Events {
    events: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events {
            events: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the descriptor and readiness bits of the event at `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<(RawFd, Ready)> {
        self.events.get(idx).map(|event| {
            (
                event.u64 as RawFd,
                epoll_to_ready(event.events as c_int),
            )
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Epoll, Events};
    use crate::ready::Ready;
    use crate::sys::eventfd::EventFd;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn eventfd_readiness_roundtrip() {
        let epoll = Epoll::new().unwrap();
        let eventfd = EventFd::new().unwrap();
        let fd = eventfd.as_raw_fd();

        epoll.add(fd, Ready::readable()).unwrap();

        let mut events = Events::with_capacity(8);
        epoll.wait(&mut events, 0).unwrap();
        assert!(events.is_empty());

        eventfd.write(1).unwrap();
        epoll.wait(&mut events, 100).unwrap();
        assert_eq!(events.len(), 1);

        let (ready_fd, ready) = events.get(0).unwrap();
        assert_eq!(ready_fd, fd);
        assert!(ready.is_readable());

        epoll.delete(fd).unwrap();
    }
}
