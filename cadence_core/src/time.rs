use std::{fmt::Display, time::Duration};

/// Saturating conversion from a [`Duration`] to nanoseconds.
fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// A coordinate in the logical-time lattice.
///
/// A `Tag` pairs a logical instant (nanoseconds from the origin of logical
/// time) with a superdense microstep. Tags are totally ordered
/// lexicographically; the microstep orders zero-delay events causally within
/// one instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    /// Logical instant, in nanoseconds from the origin.
    time: i64,
    /// Superdense microstep within the instant.
    microstep: u32,
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Tag::NEVER {
            write!(f, "[NEVER]")
        } else if *self == Tag::FOREVER {
            write!(f, "[FOREVER]")
        } else {
            write!(f, "[{}ns+{}]", self.time, self.microstep)
        }
    }
}

impl Tag {
    /// The tag before all others.
    pub const NEVER: Tag = Tag {
        time: i64::MIN,
        microstep: 0,
    };

    /// The tag after all others.
    pub const FOREVER: Tag = Tag {
        time: i64::MAX,
        microstep: u32::MAX,
    };

    /// The origin of logical time.
    pub const ZERO: Tag = Tag {
        time: 0,
        microstep: 0,
    };

    pub const fn new(time: i64, microstep: u32) -> Self {
        Self { time, microstep }
    }

    /// Create a tag at the given offset from the origin, microstep 0.
    pub fn from_offset(offset: Duration) -> Self {
        Self {
            time: duration_nanos(offset),
            microstep: 0,
        }
    }

    pub const fn time(&self) -> i64 {
        self.time
    }

    pub const fn microstep(&self) -> u32 {
        self.microstep
    }

    /// The logical instant as an offset from the origin. `None` for tags
    /// before the origin.
    pub fn offset(&self) -> Option<Duration> {
        u64::try_from(self.time).ok().map(Duration::from_nanos)
    }

    /// The tag at which an event scheduled from `self` with `interval` delay
    /// fires.
    ///
    /// A positive interval moves to a later instant at microstep 0. A zero
    /// interval stays within the instant and takes the next microstep: "zero
    /// delay" means *strictly later* in the superdense order. Saturates at
    /// [`Tag::FOREVER`].
    pub fn after(&self, interval: Duration) -> Self {
        if interval.is_zero() {
            match self.microstep.checked_add(1) {
                Some(microstep) => Self {
                    time: self.time,
                    microstep,
                },
                None => Self::FOREVER,
            }
        } else {
            match self.time.checked_add(duration_nanos(interval)) {
                Some(time) => Self { time, microstep: 0 },
                None => Self::FOREVER,
            }
        }
    }

    /// Interval addition with absorbing sentinels: [`Tag::NEVER`] and
    /// [`Tag::FOREVER`] are fixed points. Used for timer re-arming.
    pub fn strict_after(&self, interval: Duration) -> Self {
        if *self == Self::NEVER || *self == Self::FOREVER {
            *self
        } else {
            self.after(interval)
        }
    }

    /// The physical-clock lag behind this tag's instant, in nanoseconds.
    /// Negative when physical time has not yet reached the instant.
    pub fn lag(&self, physical_now: i64) -> i64 {
        physical_now.saturating_sub(self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        let t0 = Tag::new(0, 0);
        let t0m1 = Tag::new(0, 1);
        let t1 = Tag::new(1, 0);

        assert!(Tag::NEVER < t0);
        assert!(t0 < t0m1);
        assert!(t0m1 < t1);
        assert!(t1 < Tag::FOREVER);
    }

    #[test]
    fn test_zero_delay_is_next_microstep() {
        let tag = Tag::new(1_000, 3);
        assert_eq!(tag.after(Duration::ZERO), Tag::new(1_000, 4));
    }

    #[test]
    fn test_positive_delay_resets_microstep() {
        let tag = Tag::new(1_000, 3);
        assert_eq!(tag.after(Duration::from_nanos(500)), Tag::new(1_500, 0));
    }

    #[test]
    fn test_saturation() {
        let tag = Tag::new(i64::MAX - 1, 0);
        assert_eq!(tag.after(Duration::from_secs(10)), Tag::FOREVER);

        let tag = Tag::new(0, u32::MAX);
        assert_eq!(tag.after(Duration::ZERO), Tag::FOREVER);
    }

    #[test]
    fn test_sentinels_absorb() {
        assert_eq!(Tag::NEVER.strict_after(Duration::from_secs(1)), Tag::NEVER);
        assert_eq!(
            Tag::FOREVER.strict_after(Duration::from_secs(1)),
            Tag::FOREVER
        );
        assert_eq!(
            Tag::ZERO.strict_after(Duration::from_secs(1)),
            Tag::new(1_000_000_000, 0)
        );
    }

    #[test]
    fn test_lag() {
        let tag = Tag::new(1_000, 0);
        assert_eq!(tag.lag(1_500), 500);
        assert_eq!(tag.lag(500), -500);
    }
}
