//! Readiness conditions and interest masks.

use std::fmt;
use std::ops::BitOr;

const READABLE: u8 = 0b0001;
const PEER_CLOSED: u8 = 0b0010;
const HANG_UP: u8 = 0b0100;
const ERROR: u8 = 0b1000;

/// Conditions a registration wants to be woken for.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    /// Data can be read without blocking.
    pub const READABLE: Self = Self(READABLE);
    /// The peer shut down its writing half.
    pub const PEER_CLOSED: Self = Self(PEER_CLOSED);
    /// The descriptor hung up in both directions.
    pub const HANG_UP: Self = Self(HANG_UP);
    /// An error is pending on the descriptor.
    pub const ERROR: Self = Self(ERROR);
    /// Readable data plus every closing condition.
    pub const ALL: Self = Self(READABLE | PEER_CLOSED | HANG_UP | ERROR);

    /// Returns `true` if any condition in `readiness` is of interest.
    #[must_use]
    pub const fn matches(self, readiness: Readiness) -> bool {
        self.0 & readiness.0 != 0
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0)
    }
}

/// Conditions observed on a descriptor in one readiness pass.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Readiness(u8);

impl Readiness {
    /// Builds a readiness value from the raw conditions reported by the
    /// poller. A hang-up is a closure in both directions.
    #[must_use]
    pub const fn from_conditions(
        readable: bool,
        read_closed: bool,
        write_closed: bool,
        error: bool,
    ) -> Self {
        let mut bits = 0;
        if readable {
            bits |= READABLE;
        }
        if read_closed {
            bits |= PEER_CLOSED;
        }
        if read_closed && write_closed {
            bits |= HANG_UP;
        }
        if error {
            bits |= ERROR;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    #[must_use]
    pub const fn is_peer_closed(self) -> bool {
        self.0 & PEER_CLOSED != 0
    }

    #[must_use]
    pub const fn is_hang_up(self) -> bool {
        self.0 & HANG_UP != 0
    }

    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 & ERROR != 0
    }

    /// Peer-closed, hang-up or error: the descriptor is going away.
    #[must_use]
    pub const fn is_closing(self) -> bool {
        self.0 & (PEER_CLOSED | HANG_UP | ERROR) != 0
    }
}

impl From<Interest> for Readiness {
    fn from(interest: Interest) -> Self {
        Self(interest.0)
    }
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self::from_conditions(
            event.is_readable(),
            event.is_read_closed(),
            event.is_write_closed(),
            event.is_error(),
        )
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0)
    }
}

fn write_flags(f: &mut fmt::Formatter<'_>, bits: u8) -> fmt::Result {
    const NAMES: [(u8, &str); 4] = [
        (READABLE, "READABLE"),
        (PEER_CLOSED, "PEER_CLOSED"),
        (HANG_UP, "HANG_UP"),
        (ERROR, "ERROR"),
    ];

    if bits == 0 {
        return f.write_str("(empty)");
    }
    let mut first = true;
    for (bit, name) in NAMES {
        if bits & bit != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_only() {
        let r = Readiness::from_conditions(true, false, false, false);
        assert!(r.is_readable());
        assert!(!r.is_closing());
    }

    #[test]
    fn rdhup_is_peer_closed_not_hang_up() {
        let r = Readiness::from_conditions(true, true, false, false);
        assert!(r.is_peer_closed());
        assert!(!r.is_hang_up());
        assert!(r.is_closing());
    }

    #[test]
    fn hup_sets_both_closing_flags() {
        let r = Readiness::from_conditions(false, true, true, false);
        assert!(r.is_peer_closed());
        assert!(r.is_hang_up());
    }

    #[test]
    fn error_alone() {
        let r = Readiness::from_conditions(false, false, true, true);
        assert!(r.is_error());
        assert!(!r.is_hang_up());
    }

    #[test]
    fn interest_matching() {
        let readable = Readiness::from(Interest::READABLE);
        let hup = Readiness::from(Interest::HANG_UP);

        assert!(Interest::READABLE.matches(readable));
        assert!(!Interest::READABLE.matches(hup));
        assert!(Interest::ALL.matches(hup));
        assert!((Interest::READABLE | Interest::HANG_UP).matches(hup));
        assert!(!Interest::ALL.matches(Readiness::default()));
    }

    #[test]
    fn debug_lists_flags() {
        let r = Readiness::from_conditions(true, true, true, false);
        assert_eq!(format!("{r:?}"), "READABLE | PEER_CLOSED | HANG_UP");
        assert_eq!(format!("{:?}", Readiness::default()), "(empty)");
    }
}
