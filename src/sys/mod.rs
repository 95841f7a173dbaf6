macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod epoll;
pub mod eventfd;
pub mod fd;
pub mod signalfd;
pub mod timerfd;

pub use epoll::{Epoll, Events};
pub use eventfd::EventFd;
pub use fd::FileDesc;
pub use signalfd::{SigSet, SignalFd};
pub use timerfd::TimerFd;
