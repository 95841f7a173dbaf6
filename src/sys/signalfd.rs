use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

use libc::c_int;

use super::fd::FileDesc;

/// A signal mask, wrapping the libc `sigset_t` macros.
#[derive(Clone)]
pub struct SigSet {
    raw: libc::sigset_t,
}

impl SigSet {
    pub fn empty() -> SigSet {
        let mut raw = unsafe { mem::zeroed() };
        let rt = unsafe { libc::sigemptyset(&mut raw) };
        debug_assert_eq!(rt, 0);
        SigSet { raw }
    }

    pub fn add(&mut self, signo: c_int) {
        let rt = unsafe { libc::sigaddset(&mut self.raw, signo) };
        debug_assert_eq!(rt, 0);
    }

    pub fn del(&mut self, signo: c_int) {
        let rt = unsafe { libc::sigdelset(&mut self.raw, signo) };
        debug_assert_eq!(rt, 0);
    }

    pub fn contains(&self, signo: c_int) -> bool {
        unsafe { libc::sigismember(&self.raw, signo) == 1 }
    }

    fn raw(&self) -> *const libc::sigset_t {
        &self.raw
    }
}

/// Blocks `signo` for the calling thread.
///
/// A signalfd only sees signals that cannot be delivered the classic way, so
/// the dispatching thread must block every signal it watches.
pub fn block_signal(signo: c_int) -> io::Result<()> {
    sigmask_delta(libc::SIG_BLOCK, signo)
}

/// Unblocks `signo` for the calling thread, restoring default delivery.
pub fn unblock_signal(signo: c_int) -> io::Result<()> {
    sigmask_delta(libc::SIG_UNBLOCK, signo)
}

fn sigmask_delta(how: c_int, signo: c_int) -> io::Result<()> {
    let mut set = SigSet::empty();
    set.add(signo);

    // pthread_sigmask reports its error as the return value, not via errno.
    let rt = unsafe { libc::pthread_sigmask(how, set.raw(), std::ptr::null_mut()) };
    if rt != 0 {
        return Err(io::Error::from_raw_os_error(rt));
    }
    Ok(())
}

/// A signal descriptor.
///
/// Becomes readable when a signal in its mask is pending for the process (or
/// for the reading thread); each read consumes one `signalfd_siginfo`
/// record. The descriptor closes on drop.
#[derive(Debug)]
pub struct SignalFd {
    inner: FileDesc,
}

impl SignalFd {
    /// Creates a non-blocking, close-on-exec signalfd with an empty mask.
    pub fn new() -> io::Result<SignalFd> {
        let mask = SigSet::empty();
        let flags = libc::SFD_CLOEXEC | libc::SFD_NONBLOCK;
        let fd = syscall!(signalfd(-1, mask.raw(), flags))?;

        Ok(SignalFd {
            inner: unsafe { FileDesc::new(fd) },
        })
    }

    /// Replaces the set of signals the descriptor watches.
    pub fn set_mask(&self, mask: &SigSet) -> io::Result<()> {
        let flags = libc::SFD_CLOEXEC | libc::SFD_NONBLOCK;
        syscall!(signalfd(self.inner.as_raw_fd(), mask.raw(), flags))?;
        Ok(())
    }

    /// Reads one pending signal record. Fails with `WouldBlock` when no
    /// watched signal is pending.
    pub fn read(&self) -> io::Result<libc::signalfd_siginfo> {
        let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
        let len = mem::size_of::<libc::signalfd_siginfo>();

        let n = syscall!(read(
            self.inner.as_raw_fd(),
            &mut info as *mut _ as *mut libc::c_void,
            len
        ))?;

        if n as usize != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short signalfd read",
            ));
        }

        Ok(info)
    }
}

impl AsRawFd for SignalFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::SigSet;

    #[test]
    fn sigset_membership() {
        let mut set = SigSet::empty();
        assert!(!set.contains(libc::SIGUSR1));

        set.add(libc::SIGUSR1);
        assert!(set.contains(libc::SIGUSR1));
        assert!(!set.contains(libc::SIGUSR2));

        set.del(libc::SIGUSR1);
        assert!(!set.contains(libc::SIGUSR1));
    }
}
