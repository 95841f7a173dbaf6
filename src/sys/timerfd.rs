use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use super::fd::FileDesc;

/// A monotonic-clock timer descriptor.
///
/// The descriptor becomes readable when the armed deadline passes; reading it
/// yields the number of expirations since the last read. Arming is always
/// one-shot and relative: the owner re-arms whenever its earliest deadline
/// changes.
#[derive(Debug)]
pub struct TimerFd {
    inner: FileDesc,
}

impl TimerFd {
    /// Creates a non-blocking, close-on-exec timerfd on CLOCK_MONOTONIC.
    pub fn new() -> io::Result<TimerFd> {
        let flags = libc::TFD_CLOEXEC | libc::TFD_NONBLOCK;
        let timerfd = syscall!(timerfd_create(libc::CLOCK_MONOTONIC, flags))?;

        Ok(TimerFd {
            inner: unsafe { FileDesc::new(timerfd) },
        })
    }

    /// Arms a single expiration `delay` from now, replacing any previous
    /// setting. A zero `delay` would disarm the timer instead; callers clamp
    /// to a positive value first.
    pub fn arm(&self, delay: Duration) -> io::Result<()> {
        let new_value = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: duration_to_timespec(delay),
        };

        syscall!(timerfd_settime(
            self.inner.as_raw_fd(),
            0,
            &new_value,
            std::ptr::null_mut()
        ))?;

        Ok(())
    }

    /// Reads the expiration count accumulated since the last read. Fails
    /// with `WouldBlock` if the timer has not expired.
    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

fn duration_to_timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::TimerFd;
    use std::io;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn arm_and_expire() {
        let timerfd = TimerFd::new().unwrap();
        timerfd.arm(Duration::from_millis(1)).unwrap();

        thread::sleep(Duration::from_millis(20));
        let count = timerfd.read().unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn read_before_expiry_would_block() {
        let timerfd = TimerFd::new().unwrap();
        timerfd.arm(Duration::from_secs(60)).unwrap();

        let err = timerfd.read().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn rearm_replaces_previous_deadline() {
        let timerfd = TimerFd::new().unwrap();
        timerfd.arm(Duration::from_secs(60)).unwrap();
        timerfd.arm(Duration::from_millis(1)).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(timerfd.read().unwrap(), 1);
    }
}
