//! `{seconds, nanos}` time representations used on the wire.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{ProtoError, Result};
use crate::NANOS_PER_SECOND;

/// A point in time as whole seconds since the Unix epoch plus a sub-second
/// nanosecond remainder in `0..1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Result<Self> {
        if !(0..NANOS_PER_SECOND as i32).contains(&nanos) {
            return Err(ProtoError::InvalidNanos(nanos));
        }
        Ok(Self { seconds, nanos })
    }

    /// Split a wall-clock time, truncating toward the second boundary.
    pub fn from_system_time(time: SystemTime) -> Result<Self> {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ProtoError::BeforeEpoch(e.duration()))?;
        let seconds = i64::try_from(since_epoch.as_secs())
            .map_err(|_| ProtoError::DurationOutOfRange(since_epoch))?;
        Ok(Self {
            seconds,
            nanos: since_epoch.subsec_nanos() as i32,
        })
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.seconds.max(0) as u64, self.nanos.max(0) as u32)
    }

    /// Recombine into nanoseconds since the epoch.
    #[inline]
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.seconds) * i128::from(NANOS_PER_SECOND) + i128::from(self.nanos)
    }

    #[inline]
    pub fn as_millis(&self) -> i64 {
        self.seconds * 1000 + i64::from(self.nanos) / 1_000_000
    }
}

/// A span of time as whole seconds plus a nanosecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProtoDuration {
    pub seconds: i64,
    pub nanos: i32,
}

impl ProtoDuration {
    pub fn from_duration(duration: Duration) -> Result<Self> {
        let seconds = i64::try_from(duration.as_secs())
            .map_err(|_| ProtoError::DurationOutOfRange(duration))?;
        Ok(Self {
            seconds,
            nanos: duration.subsec_nanos() as i32,
        })
    }

    pub fn to_duration(self) -> Duration {
        Duration::new(self.seconds.max(0) as u64, self.nanos.max(0) as u32)
    }

    #[inline]
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.seconds) * i128::from(NANOS_PER_SECOND) + i128::from(self.nanos)
    }
}

impl TryFrom<Duration> for ProtoDuration {
    type Error = ProtoError;

    fn try_from(duration: Duration) -> Result<Self> {
        Self::from_duration(duration)
    }
}

impl TryFrom<SystemTime> for Timestamp {
    type Error = ProtoError;

    fn try_from(time: SystemTime) -> Result<Self> {
        Self::from_system_time(time)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_preserves_sub_second_precision() {
        let time = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let ts = Timestamp::from_system_time(time).unwrap();

        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 123_456_789);
        assert_eq!(ts.as_nanos(), 1_700_000_000_123_456_789);
        assert_eq!(ts.to_system_time(), time);
    }

    #[test]
    fn test_timestamp_on_second_boundary() {
        let ts = Timestamp::from_system_time(UNIX_EPOCH + Duration::from_secs(42)).unwrap();
        assert_eq!(ts, Timestamp { seconds: 42, nanos: 0 });
        assert_eq!(ts.as_millis(), 42_000);
    }

    #[test]
    fn test_timestamp_before_epoch_rejected() {
        let time = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(
            Timestamp::from_system_time(time),
            Err(ProtoError::BeforeEpoch(Duration::from_secs(1)))
        );
    }

    #[test]
    fn test_timestamp_new_validates_nanos() {
        assert!(Timestamp::new(1, 999_999_999).is_ok());
        assert_eq!(Timestamp::new(1, -1), Err(ProtoError::InvalidNanos(-1)));
        assert_eq!(
            Timestamp::new(1, 1_000_000_000),
            Err(ProtoError::InvalidNanos(1_000_000_000))
        );
    }

    #[test]
    fn test_duration_split() {
        let d = ProtoDuration::from_duration(Duration::from_millis(15_250)).unwrap();
        assert_eq!(d.seconds, 15);
        assert_eq!(d.nanos, 250_000_000);
        assert_eq!(d.to_duration(), Duration::from_millis(15_250));

        let zero = ProtoDuration::try_from(Duration::ZERO).unwrap();
        assert_eq!(zero, ProtoDuration::default());
    }
}
