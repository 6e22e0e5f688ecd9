use chrono::{Local, NaiveDateTime};

/// Wallclock abstraction so the serve loop can be driven by a fake time in tests.
pub trait TimeSource: Send + Sync {
    /// Returns the current local wallclock time, without timezone information.
    fn now(&self) -> NaiveDateTime;
}

/// Host local time via `chrono::Local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl TimeSource for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_fixed_clock_is_stable() {
        let instant = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock = FixedClock(instant);
        assert_eq!(clock.now(), instant);
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_system_clock_tracks_local_time() {
        let before = Local::now().naive_local();
        let reported = SystemClock.now();
        let after = Local::now().naive_local();
        assert!(before <= reported && reported <= after);
    }
}
