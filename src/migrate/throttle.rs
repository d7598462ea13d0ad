//! Bandwidth Throttle
//!
//! Rolling byte allowance shared by every migrating worker. Each caller
//! charges the bytes it just moved; when the allowance goes negative the
//! caller sleeps long enough to pay the debt back. The sleep happens after
//! the lock is released.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Longest idle time credited back as allowance
const MAX_BURST: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Allowance {
    bytes: i64,
    last: Option<Instant>,
}

#[derive(Debug)]
pub struct BandwidthThrottle {
    /// Bytes per second, `None` for unlimited
    rate: Option<u64>,
    state: Mutex<Allowance>,
}

impl BandwidthThrottle {
    pub fn new(bytes_per_sec: Option<u64>) -> Self {
        Self {
            rate: bytes_per_sec.filter(|&r| r > 0),
            state: Mutex::new(Allowance { bytes: 0, last: None }),
        }
    }

    /// Throttle from a MB/s setting, 0 meaning unlimited
    pub fn from_mbps(mbps: u64) -> Self {
        Self::new((mbps > 0).then(|| mbps << 20))
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn rate(&self) -> Option<u64> {
        self.rate
    }

    /// Charge `bytes` at `now` and return how long the caller must pause
    pub fn charge_at(&self, bytes: u64, now: Instant) -> Duration {
        let Some(rate) = self.rate else {
            return Duration::ZERO;
        };

        let mut state = self.state.lock();
        if let Some(last) = state.last {
            let elapsed = now.saturating_duration_since(last).min(MAX_BURST);
            state.bytes += (elapsed.as_secs_f64() * rate as f64) as i64;
            state.bytes = state.bytes.min(rate as i64);
        }
        state.last = Some(now);
        state.bytes -= bytes as i64;

        if state.bytes >= 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(-state.bytes as f64 / rate as f64)
    }

    /// Charge `bytes` and sleep off any debt
    pub fn add_and_sleep(&self, bytes: u64) {
        let pause = self.charge_at(bytes, Instant::now());
        if !pause.is_zero() {
            log::trace!("[Migrate] throttling {} bytes for {:?}", bytes, pause);
            std::thread::sleep(pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_pauses() {
        let throttle = BandwidthThrottle::from_mbps(0);
        assert_eq!(throttle.rate(), None);
        assert_eq!(throttle.charge_at(u64::MAX >> 2, Instant::now()), Duration::ZERO);
    }

    /// Test: debt is paid back at the configured rate
    #[test]
    fn test_pause_matches_debt() {
        let throttle = BandwidthThrottle::new(Some(1000));
        let t0 = Instant::now();

        let pause = throttle.charge_at(500, t0);
        assert_eq!(pause, Duration::from_millis(500));

        // half a second later the debt is gone; 250 more bytes cost 250ms
        let pause = throttle.charge_at(250, t0 + Duration::from_millis(500));
        assert_eq!(pause, Duration::from_millis(250));
    }

    /// Test: idle time is credited up to one second of bandwidth
    #[test]
    fn test_burst_is_capped() {
        let throttle = BandwidthThrottle::new(Some(1000));
        let t0 = Instant::now();
        throttle.charge_at(0, t0);

        let pause = throttle.charge_at(1000, t0 + Duration::from_secs(10));
        assert_eq!(pause, Duration::ZERO);
        let pause = throttle.charge_at(1000, t0 + Duration::from_secs(10));
        assert_eq!(pause, Duration::from_secs(1));
    }

    #[test]
    fn test_mbps_conversion() {
        assert_eq!(BandwidthThrottle::from_mbps(2).rate(), Some(2 << 20));
    }
}
