//! Simulated-time primitives: time unit, instants, and durations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unit in which simulated time is expressed.
///
/// Every [`Time`] and [`Duration`] carries its unit, and all comparisons and
/// arithmetic require both operands to share one unit. Mixing units is a
/// programming error, not a runtime condition, so it panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Milliseconds of simulated time.
    Milliseconds,
    /// Seconds of simulated time.
    Seconds,
    /// Minutes of simulated time.
    Minutes,
    /// Hours of simulated time.
    Hours,
}

impl TimeUnit {
    /// Number of wall-clock nanoseconds in one unit of simulated time at
    /// acceleration factor 1.0.
    pub fn nanos_per_unit(self) -> f64 {
        match self {
            TimeUnit::Milliseconds => 1.0e6,
            TimeUnit::Seconds => 1.0e9,
            TimeUnit::Minutes => 60.0e9,
            TimeUnit::Hours => 3_600.0e9,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
        };
        f.write_str(s)
    }
}

/// An instant on the simulated-time axis.
///
/// Immutable value type: all operations return new values. Instants are
/// totally ordered within one unit.
///
/// # Examples
///
/// ```
/// use hem_sim::time::{Duration, Time, TimeUnit};
///
/// let t = Time::new(2.0, TimeUnit::Seconds);
/// let later = t.add(Duration::new(3.0, TimeUnit::Seconds));
/// assert_eq!(later.value(), 5.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Time {
    value: f64,
    unit: TimeUnit,
}

impl Time {
    /// Creates an instant at `value` units of simulated time.
    ///
    /// # Panics
    ///
    /// Panics if `value` is NaN or negative.
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        assert!(value.is_finite() && value >= 0.0, "time must be finite and >= 0");
        Self { value, unit }
    }

    /// The instant at the origin of the simulated-time axis.
    pub fn zero(unit: TimeUnit) -> Self {
        Self { value: 0.0, unit }
    }

    /// Sentinel instant lying after every finite instant, used by engines to
    /// mean "no further event scheduled".
    pub fn infinity(unit: TimeUnit) -> Self {
        Self {
            value: f64::INFINITY,
            unit,
        }
    }

    /// Scalar value in this instant's unit.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Unit of this instant.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Returns `true` for the "no further event" sentinel.
    pub fn is_infinite(&self) -> bool {
        self.value.is_infinite()
    }

    fn assert_same_unit(&self, other_unit: TimeUnit) {
        assert!(
            self.unit == other_unit,
            "time unit mismatch: {} vs {}",
            self.unit,
            other_unit
        );
    }

    /// Returns the instant `duration` after this one.
    ///
    /// # Panics
    ///
    /// Panics if the units differ.
    pub fn add(&self, duration: Duration) -> Time {
        self.assert_same_unit(duration.unit);
        Time {
            value: self.value + duration.value,
            unit: self.unit,
        }
    }

    /// Returns the duration from `earlier` to this instant.
    ///
    /// # Panics
    ///
    /// Panics if the units differ or `earlier` lies after this instant.
    pub fn sub(&self, earlier: Time) -> Duration {
        self.assert_same_unit(earlier.unit);
        assert!(
            earlier.value <= self.value,
            "negative duration: {} - {}",
            self.value,
            earlier.value
        );
        Duration {
            value: self.value - earlier.value,
            unit: self.unit,
        }
    }

    /// `true` when this instant lies strictly before `other`.
    ///
    /// # Panics
    ///
    /// Panics if the units differ.
    pub fn is_before(&self, other: Time) -> bool {
        self.assert_same_unit(other.unit);
        self.value < other.value
    }

    /// `true` when this instant lies at or before `other`.
    ///
    /// # Panics
    ///
    /// Panics if the units differ.
    pub fn is_before_or_equal(&self, other: Time) -> bool {
        self.assert_same_unit(other.unit);
        self.value <= other.value
    }

    /// The earlier of two instants.
    pub fn min(self, other: Time) -> Time {
        if other.is_before(self) { other } else { self }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

/// A span of simulated time.
///
/// `Duration::infinity(unit)` is the sentinel returned by `time_advance` when
/// a model has no further internal transition scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Duration {
    value: f64,
    unit: TimeUnit,
}

impl Duration {
    /// Creates a duration of `value` units.
    ///
    /// # Panics
    ///
    /// Panics if `value` is NaN or negative.
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        assert!(!value.is_nan() && value >= 0.0, "duration must be >= 0");
        Self { value, unit }
    }

    /// The zero-length duration.
    pub fn zero(unit: TimeUnit) -> Self {
        Self { value: 0.0, unit }
    }

    /// Sentinel meaning "no further internal transition scheduled".
    pub fn infinity(unit: TimeUnit) -> Self {
        Self {
            value: f64::INFINITY,
            unit,
        }
    }

    /// Scalar value in this duration's unit.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Unit of this duration.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Returns `true` for the "no further internal transition" sentinel.
    pub fn is_infinite(&self) -> bool {
        self.value.is_infinite()
    }

    /// Converts this simulated span to a wall-clock span at the given
    /// acceleration factor.
    ///
    /// # Panics
    ///
    /// Panics if `acceleration` is not strictly positive or the duration is
    /// infinite.
    pub fn to_wall_clock(&self, acceleration: f64) -> std::time::Duration {
        assert!(acceleration > 0.0, "acceleration factor must be > 0");
        assert!(!self.is_infinite(), "infinite duration has no wall-clock image");
        let nanos = self.value * self.unit.nanos_per_unit() / acceleration;
        std::time::Duration::from_nanos(nanos.round() as u64)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf{}", self.unit)
        } else {
            write!(f, "{}{}", self.value, self.unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_add_and_sub() {
        let t = Time::new(2.5, TimeUnit::Seconds);
        let later = t.add(Duration::new(1.5, TimeUnit::Seconds));
        assert_eq!(later.value(), 4.0);
        assert_eq!(later.sub(t).value(), 1.5);
    }

    #[test]
    fn time_ordering() {
        let a = Time::new(1.0, TimeUnit::Hours);
        let b = Time::new(2.0, TimeUnit::Hours);
        assert!(a.is_before(b));
        assert!(!b.is_before(a));
        assert!(a.is_before_or_equal(a));
        assert_eq!(a.min(b), a);
    }

    #[test]
    #[should_panic]
    fn mixed_units_panic() {
        let a = Time::new(1.0, TimeUnit::Hours);
        let b = Time::new(1.0, TimeUnit::Seconds);
        let _ = a.is_before(b);
    }

    #[test]
    fn infinity_lies_after_everything() {
        let inf = Time::infinity(TimeUnit::Seconds);
        assert!(inf.is_infinite());
        assert!(Time::new(1.0e12, TimeUnit::Seconds).is_before(inf));
    }

    #[test]
    fn infinite_time_advance_sentinel() {
        let d = Duration::infinity(TimeUnit::Seconds);
        assert!(d.is_infinite());
        let t = Time::zero(TimeUnit::Seconds).add(d);
        assert!(t.is_infinite());
    }

    #[test]
    fn wall_clock_conversion_respects_acceleration() {
        let d = Duration::new(2.0, TimeUnit::Seconds);
        assert_eq!(d.to_wall_clock(1.0), std::time::Duration::from_secs(2));
        assert_eq!(d.to_wall_clock(4.0), std::time::Duration::from_millis(500));
        let h = Duration::new(1.0, TimeUnit::Hours);
        assert_eq!(h.to_wall_clock(3600.0), std::time::Duration::from_secs(1));
    }

    #[test]
    #[should_panic]
    fn non_positive_acceleration_panics() {
        Duration::new(1.0, TimeUnit::Seconds).to_wall_clock(0.0);
    }

    #[test]
    #[should_panic]
    fn negative_duration_panics() {
        Duration::new(-1.0, TimeUnit::Seconds);
    }
}
