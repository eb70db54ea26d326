/*! Timestamps supplied by the caller.

The transport core never reads a clock. Every operation that arms or checks a timer takes the
current [Instant] as an argument, which keeps tests deterministic and lets several stack instances
run on different notions of time.

 - [Instant] is a point in time with millisecond resolution.
 - [Duration] is the standard library's span of time.
 - [Expiration] is a timer deadline which may be unset.

[Instant]: struct.Instant.html
[Duration]: https://doc.rust-lang.org/core/time/struct.Duration.html
[Expiration]: enum.Expiration.html
*/
use core::{convert::TryFrom, fmt, ops};
pub use core::time::Duration;

/// Milliseconds since some origin picked by the caller, like system start.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    /// Milliseconds since the origin.
    pub millis: i64,
}

/// The deadline of a timer.
///
/// Unset deadlines order after every set one, so the earliest of several timers is their minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expiration {
    /// Fires once `now` reaches the instant.
    When(Instant),
    /// Not armed.
    Never,
}

impl Instant {
    /// An instant from milliseconds since the origin.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    /// Milliseconds since the origin.
    pub fn total_millis(&self) -> i64 {
        self.millis
    }
}

/// Saturate a duration into the millisecond range of an instant.
fn span(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::max_value())
}

impl Expiration {
    /// Whether the deadline lies at or before `now`.
    pub fn is_expired(self, now: Instant) -> bool {
        match self {
            Expiration::When(deadline) => deadline <= now,
            Expiration::Never => false,
        }
    }

    /// Whether a deadline is set.
    pub fn is_armed(self) -> bool {
        self != Expiration::Never
    }

    /// The earlier of two deadlines.
    pub fn earliest(self, other: Self) -> Self {
        self.min(other)
    }

    /// The deadline, if set.
    pub fn instant(self) -> Option<Instant> {
        match self {
            Expiration::When(deadline) => Some(deadline),
            Expiration::Never => None,
        }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sign = if self.millis < 0 { "-" } else { "" };
        let millis = self.millis.unsigned_abs();
        write!(f, "{}{}.{:03}s", sign, millis / 1000, millis % 1000)
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant { millis: self.millis.saturating_add(span(rhs)) }
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant { millis: self.millis.saturating_sub(span(rhs)) }
    }
}

/// The time elapsed from `rhs` to `self`, zero if `rhs` is later.
impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        let elapsed = self.millis.saturating_sub(rhs.millis).max(0);
        Duration::from_millis(elapsed as u64)
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::Never
    }
}

impl From<Option<Instant>> for Expiration {
    fn from(deadline: Option<Instant>) -> Self {
        deadline.map_or(Expiration::Never, Expiration::When)
    }
}

impl From<Expiration> for Option<Instant> {
    fn from(deadline: Expiration) -> Self {
        deadline.instant()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        let start = Instant::from_millis(4);
        assert_eq!(start + Duration::from_millis(6), Instant::from_millis(10));
        assert_eq!(start - Duration::from_millis(5), Instant::from_millis(-1));
        assert_eq!(Instant::from_millis(12) - start, Duration::from_millis(8));
        assert_eq!(start - Instant::from_millis(12), Duration::from_millis(0));
        assert_eq!(start + Duration::from_secs(u64::max_value()), Instant::from_millis(i64::max_value()));
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Instant::from_millis(5674)), "5.674s");
        assert_eq!(format!("{}", Instant::from_millis(5007)), "5.007s");
        assert_eq!(format!("{}", Instant::from_millis(-1500)), "-1.500s");
    }

    #[test]
    fn deadlines() {
        let early = Expiration::When(Instant::from_millis(10));
        let late = Expiration::When(Instant::from_millis(20));
        assert!(early < late);
        assert!(late < Expiration::Never);
        assert_eq!(Expiration::Never.earliest(late), late);
        assert_eq!(late.earliest(early), early);
        assert!(early.is_expired(Instant::from_millis(10)));
        assert!(!late.is_expired(Instant::from_millis(10)));
        assert!(!Expiration::Never.is_expired(Instant::from_millis(i64::max_value())));
        assert_eq!(Expiration::from(None), Expiration::Never);
        assert_eq!(late.instant(), Some(Instant::from_millis(20)));
    }
}
