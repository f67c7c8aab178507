use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Offset in seconds between the Unix epoch and the NTP epoch (1900-01-01).
const NTP_EPOCH_OFFSET: u64 = 0x83AA_7E80;

/// Anchors a monotonic [`Instant`] to wall-clock time so later instants can
/// be expressed as NTP timestamps without re-reading the system clock.
#[derive(Debug, Copy, Clone)]
pub struct WallClock {
    origin: Instant,
    unix_at_origin: Duration,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            unix_at_origin: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_secs(0)),
        }
    }

    /// Builds a clock with a fixed Unix time at `origin`. Used by tests to
    /// get deterministic NTP output.
    pub fn with_origin(origin: Instant, unix_at_origin: Duration) -> Self {
        Self {
            origin,
            unix_at_origin,
        }
    }

    pub fn unix(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.origin) + self.unix_at_origin
    }

    /// Full 64-bit NTP timestamp (32.32 fixed point) for `now`.
    pub fn ntp(&self, now: Instant) -> u64 {
        unix2ntp(self.unix(now).as_nanos() as u64)
    }

    /// Middle 32 bits of the NTP timestamp, the form RR/SR blocks exchange.
    pub fn compact_ntp(&self, now: Instant) -> u32 {
        compact(self.ntp(now))
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn unix2ntp(unix_ns: u64) -> u64 {
    let mut s = unix_ns / 1_000_000_000;
    s += NTP_EPOCH_OFFSET;
    let mut f = unix_ns % 1_000_000_000;
    f <<= 32;
    f /= 1_000_000_000;
    (s << 32) | f
}

pub fn ntp2unix(ntp: u64) -> u64 {
    let mut s = ntp >> 32;
    let mut f = ntp & 0xFFFF_FFFF;
    f *= 1_000_000_000;
    f >>= 32;
    s -= NTP_EPOCH_OFFSET;
    s * 1_000_000_000 + f
}

/// Middle 32 bits out of a 64-bit NTP timestamp.
pub fn compact(ntp: u64) -> u32 {
    (ntp >> 16) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntp_round_trip() {
        let unix_ns = 1_700_000_000_123_456_789u64;
        let ntp = unix2ntp(unix_ns);
        let back = ntp2unix(ntp);
        // The 32-bit fraction cannot represent every nanosecond exactly.
        assert!(back.abs_diff(unix_ns) < 2);
    }

    #[test]
    fn test_ntp_epoch_offset() {
        // Unix zero is exactly the NTP offset, in seconds.
        assert_eq!(unix2ntp(0) >> 32, NTP_EPOCH_OFFSET);
        assert_eq!(unix2ntp(0) & 0xFFFF_FFFF, 0);
    }

    #[test]
    fn test_wall_clock_advances() {
        let origin = Instant::now();
        let clock = WallClock::with_origin(origin, Duration::from_secs(1_700_000_000));

        let a = clock.ntp(origin);
        let b = clock.ntp(origin + Duration::from_secs(2));
        assert_eq!((b >> 32) - (a >> 32), 2);
    }

    #[test]
    fn test_compact_ntp() {
        let ntp = 0x1122_3344_5566_7788u64;
        assert_eq!(compact(ntp), 0x3344_5566);
    }
}
