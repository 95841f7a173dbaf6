use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use super::fd::FileDesc;

/// A kernel counter descriptor, the cross-thread wakeup primitive.
///
/// Writes from any thread add to the counter and make the read side ready;
/// any number of writes coalesce into a single readiness report. A read
/// drains the counter, so one wakeup services a whole burst.
#[derive(Debug)]
pub struct EventFd {
    inner: FileDesc,
}

impl EventFd {
    /// Creates an eventfd with a zero counter, non-blocking and
    /// close-on-exec.
    pub fn new() -> io::Result<EventFd> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let eventfd = syscall!(eventfd(0, flags))?;

        Ok(EventFd {
            inner: unsafe { FileDesc::new(eventfd) },
        })
    }

    /// Reads and resets the counter. Fails with `WouldBlock` when the
    /// counter is zero.
    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Adds `val` to the counter.
    pub fn write(&self, val: u64) -> io::Result<()> {
        let buf: [u8; 8] = val.to_ne_bytes();
        (&self.inner).write_all(&buf)?;
        Ok(())
    }
}

impl FromRawFd for EventFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        EventFd {
            inner: FileDesc::new(fd),
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::EventFd;

    #[test]
    fn write_and_read() {
        let eventfd = EventFd::new().unwrap();
        eventfd.write(123).unwrap();
        let count = eventfd.read().unwrap();
        assert_eq!(123, count);
    }

    #[test]
    fn writes_coalesce() {
        let eventfd = EventFd::new().unwrap();
        eventfd.write(1).unwrap();
        eventfd.write(1).unwrap();
        eventfd.write(1).unwrap();
        assert_eq!(3, eventfd.read().unwrap());
        assert!(eventfd.read().is_err());
    }

    #[test]
    fn write_block() {
        let eventfd = EventFd::new().unwrap();

        assert!(eventfd.write(0xffff_ffff_ffff_fffe).is_ok());
        // The counter saturates; a non-blocking write reports WouldBlock.
        assert!(eventfd.write(0xffff_ffff_ffff_fffe).is_err());
    }
}
