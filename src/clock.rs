use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

/// Clock is the time source used for every expiry decision.
///
/// Injecting a [`FakeClock`] makes the whole expiry and sliding-interval
/// logic deterministic in tests.
pub trait Clock: Send + Sync {
    /// now returns the current UTC wall time.
    fn now(&self) -> OffsetDateTime;

    /// unix_seconds returns the current time as signed seconds since the
    /// UNIX epoch, the encoding the entries table stores.
    fn unix_seconds(&self) -> i64 {
        self.now().unix_timestamp()
    }
}

/// SystemClock reads the operating system UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// FakeClock is a settable clock for deterministic tests.
#[derive(Debug)]
pub struct FakeClock {
    seconds: AtomicI64,
}

impl FakeClock {
    pub fn new(unix_seconds: i64) -> Self {
        FakeClock {
            seconds: AtomicI64::new(unix_seconds),
        }
    }

    /// set moves the clock to an absolute instant.
    pub fn set(&self, unix_seconds: i64) {
        self.seconds.store(unix_seconds, Ordering::SeqCst);
    }

    /// advance moves the clock forward by the given number of seconds.
    pub fn advance(&self, seconds: i64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.seconds.load(Ordering::SeqCst))
            .expect("fake clock seconds out of the representable range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_set_and_advance() {
        let clock = FakeClock::new(1000);
        assert_eq!(clock.unix_seconds(), 1000);
        clock.advance(60);
        assert_eq!(clock.unix_seconds(), 1060);
        clock.set(0);
        assert_eq!(clock.unix_seconds(), 0);
    }

    #[test]
    fn system_clock_is_epoch_based() {
        // 2020-01-01T00:00:00Z as a floor; catches a clock wired to zero.
        assert!(SystemClock.unix_seconds() > 1_577_836_800);
    }
}
