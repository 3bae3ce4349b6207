//! Time APIs for obtaining the current time and calculating with points in time and durations.
//!
//! These APIs are made for the BLE stack and are not meant to be general-purpose. All values have
//! microsecond resolution; [`Instant`] is 64 bits wide so that connection anchor points stay
//! monotonic for the lifetime of a connection.

use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// A duration with microsecond resolution.
///
/// This can represent a maximum duration of about 1 hour. Overflows will result in a panic, but
/// shouldn't happen since the BLE stack doesn't deal with durations that large.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u32);

impl Duration {
    /// The duration of the interframe spacing between BLE packets.
    pub const T_IFS: Self = Duration(150);

    /// Creates a [`Duration`] from a number of microseconds.
    pub const fn from_micros(micros: u32) -> Self {
        Duration(micros)
    }

    /// Creates a [`Duration`] representing the given number of milliseconds.
    pub const fn from_millis(millis: u16) -> Self {
        Duration(millis as u32 * 1_000)
    }

    /// Creates a [`Duration`] representing a number of seconds.
    pub const fn from_secs(secs: u16) -> Self {
        Duration(secs as u32 * 1_000_000)
    }

    /// Returns the number of whole milliseconds that fit in `self`.
    pub fn whole_millis(&self) -> u32 {
        self.0 / 1_000
    }

    /// Returns the number of microseconds represented by `self`.
    pub fn as_micros(&self) -> u32 {
        self.0
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Duration(self.0.checked_add(rhs.0).expect("duration overflow"))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Duration(self.0.checked_sub(rhs.0).expect("duration underflow"))
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// Durations are rendered as milliseconds throughout: everything this stack schedules, from
/// T_IFS (`0.150ms`) to a supervision timeout (`2000ms`), reads naturally on that one scale.
impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (millis, sub_micros) = (self.0 / 1_000, self.0 % 1_000);
        if sub_micros == 0 {
            write!(f, "{}ms", millis)
        } else {
            write!(f, "{}.{:03}ms", millis, sub_micros)
        }
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// A point in time, measured in microseconds since an unspecified epoch.
///
/// `Instant`s are obtained from an implementation of [`Timer`]. They are 64 bits wide and
/// monotonic: a hardware counter wrapping around must be extended in software (see
/// [`CounterExtender`]) before being handed to the stack.
///
/// [`Timer`]: trait.Timer.html
/// [`CounterExtender`]: struct.CounterExtender.html
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64);

impl Instant {
    /// Creates an `Instant` from raw microseconds since the timer's reference point.
    ///
    /// This should only be called from a [`Timer`] implementation.
    ///
    /// [`Timer`]: trait.Timer.html
    pub fn from_raw_micros(micros: u64) -> Self {
        Instant(micros)
    }

    /// Returns the raw value from which this `Instant` was created.
    pub fn raw_micros(&self) -> u64 {
        self.0
    }

    /// Calculates the duration of time that has passed between `earlier` and `self`.
    ///
    /// Both `self` and `earlier` must have been created by the same [`Timer`], and `earlier` must
    /// not lie after `self`, or the result of this function is unspecified and may panic.
    ///
    /// [`Timer`]: trait.Timer.html
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        let micros = self.0.checked_sub(earlier.0).expect("instant underflow");
        debug_assert!(micros <= u64::from(u32::max_value()));
        Duration::from_micros(micros as u32)
    }

    /// Returns the later of `self` and `other`.
    pub fn max(self, other: Instant) -> Instant {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }
}

/// [`Instant`]s can be subtracted, which computes the [`Duration`] between the rhs and lhs using
/// [`Instant::duration_since`].
impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.duration_since(rhs)
    }
}

/// A [`Duration`] can be added to an [`Instant`], moving the [`Instant`] forwards in time.
impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, d: Duration) -> Self {
        Instant(self.0 + u64::from(d.as_micros()))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, d: Duration) {
        *self = *self + d;
    }
}

/// A [`Duration`] can be subtracted from an [`Instant`], moving the [`Instant`] backwards in time.
///
/// Saturates at the timer's epoch instead of underflowing, which is the wanted behaviour when
/// scheduling the very first receive window of a connection.
impl Sub<Duration> for Instant {
    type Output = Self;

    fn sub(self, d: Duration) -> Self {
        Instant(self.0.saturating_sub(u64::from(d.as_micros())))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// Trait for time providers.
///
/// The hardware interface has to provide an implementation of `Timer` to the stack. The
/// implementation must have microsecond resolution (1 µs or better).
///
/// Only [`now`] is required; the waiting methods have busy-polling default implementations, which
/// platforms can override with something smarter (WFI, low-power timers). Every wait performed by
/// the stack through this trait is bounded by an explicit deadline.
///
/// This trait can also be implemented by a mock timer for testing.
///
/// [`now`]: #tymethod.now
pub trait Timer {
    /// Obtain the current time as an [`Instant`].
    ///
    /// The [`Instant`]s returned by this function must never move backwards in time.
    fn now(&mut self) -> Instant;

    /// Busy-waits for (at least) the given number of microseconds.
    fn delay_micros(&mut self, micros: u32) {
        let deadline = self.now() + Duration::from_micros(micros);
        self.wait_until(deadline);
    }

    /// Returns promptly once `deadline` has been reached.
    ///
    /// Returns immediately when `deadline` lies in the past.
    fn wait_until(&mut self, deadline: Instant) {
        while self.now() < deadline {}
    }
}

/// Extends a wrapping 32-bit hardware counter into the monotonic 64-bit time base the stack
/// requires.
///
/// `Timer` implementations call [`extend`] with every raw counter read; the extender maintains the
/// software high word and detects wraparound. Counter reads that are split over multiple bus
/// accesses (separate high/low registers) must be retried until both halves are stable *before*
/// being passed here.
///
/// [`extend`]: #method.extend
#[derive(Default)]
pub struct CounterExtender {
    high: u32,
    last_low: u32,
}

impl CounterExtender {
    /// Creates an extender starting at epoch zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a raw 32-bit counter value into the 64-bit time base.
    ///
    /// Must be called often enough that no more than one counter wraparound happens between two
    /// calls (every ~71 minutes at 1 MHz).
    pub fn extend(&mut self, low: u32) -> u64 {
        if low < self.last_low {
            self.high += 1;
        }
        self.last_low = low;
        (u64::from(self.high) << 32) | u64::from(low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_arithmetic() {
        let t = Instant::from_raw_micros(5_000_000);
        assert_eq!(t + Duration::from_secs(1), Instant::from_raw_micros(6_000_000));
        assert_eq!(t - Duration::from_millis(1), Instant::from_raw_micros(4_999_000));
        assert_eq!(
            (t + Duration::from_micros(150)) - t,
            Duration::T_IFS
        );
    }

    #[test]
    fn durations_render_as_milliseconds() {
        assert_eq!(format!("{}", Duration::T_IFS), "0.150ms");
        assert_eq!(format!("{}", Duration::from_millis(50)), "50ms");
        assert_eq!(format!("{}", Duration::from_secs(2)), "2000ms");
    }

    #[test]
    fn instant_sub_saturates_at_epoch() {
        let t = Instant::from_raw_micros(100);
        assert_eq!(t - Duration::from_secs(1), Instant::from_raw_micros(0));
    }

    #[test]
    fn counter_extension_is_monotonic_across_wraparound() {
        let mut ext = CounterExtender::new();
        let mut last = 0;
        for raw in [0u32, 100, 0xFFFF_FFF0, 0xFFFF_FFFF, 3, 7, 0xFFFF_FFFE, 2] {
            let t = ext.extend(raw);
            assert!(t >= last, "{} < {}", t, last);
            last = t;
        }
        assert_eq!(last, (2 << 32) | 2);
    }
}
