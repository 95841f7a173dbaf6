use std::{fmt, ops};

/// A set of readiness events.
///
/// `Ready` describes both the interest a [`Channel`] registers with its
/// poller and the bits the kernel reports back when the descriptor becomes
/// ready. Values combine with the usual bitwise operators:
///
/// ```
/// use eddy_io::Ready;
///
/// let ready = Ready::readable() | Ready::writable();
///
/// assert!(ready.is_readable());
/// assert!(ready.is_writable());
/// assert!(!ready.is_hup());
/// ```
///
/// Only readable and writable bits can be registered as interest; the error,
/// hang-up and invalid bits are delivered unconditionally by the kernel.
///
/// [`Channel`]: crate::Channel
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Ready(usize);

const READABLE: usize = 0b0000_0001;
const WRITABLE: usize = 0b0000_0010;
const PRI: usize      = 0b0000_0100;
const ERROR: usize    = 0b0000_1000;
const HUP: usize      = 0b0001_0000;
const RDHUP: usize    = 0b0010_0000;
const NVAL: usize     = 0b0100_0000;

impl Ready {
    /// Returns the empty `Ready` set.
    #[inline]
    pub fn empty() -> Ready {
        Ready(0)
    }

    /// Returns a `Ready` representing readable readiness.
    #[inline]
    pub fn readable() -> Ready {
        Ready(READABLE)
    }

    /// Returns a `Ready` representing writable readiness.
    #[inline]
    pub fn writable() -> Ready {
        Ready(WRITABLE)
    }

    /// Returns a `Ready` representing urgent (out-of-band) readiness.
    #[inline]
    pub fn pri() -> Ready {
        Ready(PRI)
    }

    /// Returns a `Ready` representing error readiness.
    #[inline]
    pub fn error() -> Ready {
        Ready(ERROR)
    }

    /// Returns a `Ready` representing hang-up: the peer closed its end of the
    /// connection.
    #[inline]
    pub fn hup() -> Ready {
        Ready(HUP)
    }

    /// Returns a `Ready` representing a half-closed read side: the peer shut
    /// down writing but the connection is still open.
    #[inline]
    pub fn rdhup() -> Ready {
        Ready(RDHUP)
    }

    /// Returns a `Ready` representing an invalid descriptor.
    #[inline]
    pub fn nval() -> Ready {
        Ready(NVAL)
    }

    /// Returns true if `Ready` is the empty set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the value includes readable readiness.
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.contains(Ready::readable())
    }

    /// Returns true if the value includes writable readiness.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.contains(Ready::writable())
    }

    /// Returns true if the value includes urgent readiness.
    #[inline]
    pub fn is_pri(&self) -> bool {
        self.contains(Ready::pri())
    }

    /// Returns true if the value includes error readiness.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.contains(Ready::error())
    }

    /// Returns true if the value includes hang-up readiness.
    #[inline]
    pub fn is_hup(&self) -> bool {
        self.contains(Ready::hup())
    }

    /// Returns true if the value includes read-half-closed readiness.
    #[inline]
    pub fn is_rdhup(&self) -> bool {
        self.contains(Ready::rdhup())
    }

    /// Returns true if the value flags an invalid descriptor.
    #[inline]
    pub fn is_nval(&self) -> bool {
        self.contains(Ready::nval())
    }

    #[inline]
    pub fn contains(&self, other: Ready) -> bool {
        (*self & other) == other
    }

    #[inline]
    pub fn insert(&mut self, other: Ready) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Ready) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ready {
    #[inline]
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;

    #[inline]
    fn bitand(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }
}

impl ops::BitXor for Ready {
    type Output = Ready;

    #[inline]
    fn bitxor(self, other: Ready) -> Ready {
        Ready(self.0 ^ other.0)
    }
}

impl ops::Sub for Ready {
    type Output = Ready;

    #[inline]
    fn sub(self, other: Ready) -> Ready {
        Ready(self.0 & !other.0)
    }
}

impl ops::Not for Ready {
    type Output = Ready;

    #[inline]
    fn not(self) -> Ready {
        Ready(!self.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Ready::readable(), "Readable"),
            (Ready::writable(), "Writable"),
            (Ready::pri(), "Pri"),
            (Ready::error(), "Error"),
            (Ready::hup(), "Hup"),
            (Ready::rdhup(), "RdHup"),
            (Ready::nval(), "Nval"),
        ];

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        if !one {
            write!(fmt, "(empty)")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::Ready;

    #[test]
    fn bit_ops() {
        let mut ready = Ready::readable() | Ready::pri();
        assert!(ready.is_readable());
        assert!(ready.is_pri());
        assert!(!ready.is_writable());

        ready.insert(Ready::writable());
        assert!(ready.is_writable());

        ready.remove(Ready::readable() | Ready::pri());
        assert_eq!(ready, Ready::writable());

        assert!((ready - Ready::writable()).is_empty());
    }

    #[test]
    fn contains_requires_all_bits() {
        let ready = Ready::readable();
        assert!(!ready.contains(Ready::readable() | Ready::writable()));
        assert!((Ready::readable() | Ready::writable()).contains(ready));
    }
}
