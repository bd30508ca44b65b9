//! Wall-clock time for the instrument
//!
//! The hardware real-time clock is only read once, at boot. After that the
//! [`SystemClock`] derives civil time from the embassy monotonic counter, so a
//! slow or flaky RTC never stalls the acquisition loop.
//!
//! An RTC that has never been set (or cannot be read) yields
//! [`Timestamp::UNSET`], a sentinel whose weekday lies outside `0..=6`.

use core::fmt::Write;

use embassy_time::Instant;
use heapless::String;
use log::{info, warn};
use thiserror_no_std::Error;

/// Day names indexed by weekday, Sunday first.
pub const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// `YYYYMMDD`
pub type Datestamp = String<8>;

/// `YYYYMMDDTHHMMSSZ`
pub type IsoTimestamp = String<16>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("real-time clock not responding: {details}")]
    NotResponding { details: &'static str },

    #[error("real-time clock holds an invalid time")]
    InvalidTime,
}

/// Calendar time as kept by the instrument (UTC).
///
/// `weekday` runs 0 = Sunday to 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub weekday: u8,
}

impl Timestamp {
    /// Reported when the clock has never been set.
    pub const UNSET: Self = Self {
        year: 2020,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
        weekday: u8::MAX,
    };

    pub const fn is_set(&self) -> bool {
        self.weekday <= 6
    }

    pub fn weekday_name(&self) -> Option<&'static str> {
        WEEKDAYS.get(self.weekday as usize).copied()
    }

    pub fn datestamp(&self) -> Datestamp {
        let mut out = Datestamp::new();
        let _ = write!(out, "{:04}{:02}{:02}", self.year, self.month, self.day);
        out
    }

    pub fn iso8601(&self) -> IsoTimestamp {
        let mut out = IsoTimestamp::new();
        let _ = write!(
            out,
            "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        out
    }

    /// Hours since midnight as a fraction, e.g. 13:30:00 is 13.5.
    pub fn decimal_hour(&self) -> f64 {
        f64::from(self.hour) + f64::from(self.minute) / 60.0 + f64::from(self.second) / 3600.0
    }

    /// Build a timestamp from seconds since 1970-01-01T00:00:00Z.
    pub fn from_unix(secs: i64) -> Self {
        let days = secs.div_euclid(86_400);
        let time = secs.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);

        Self {
            year: year.clamp(0, i64::from(u16::MAX)) as u16,
            month,
            day,
            hour: (time / 3600) as u8,
            minute: (time % 3600 / 60) as u8,
            second: (time % 60) as u8,
            weekday: (days + 4).rem_euclid(7) as u8,
        }
    }

    /// Seconds since the Unix epoch, or `None` if any field is out of range.
    pub fn to_unix(&self) -> Option<i64> {
        let valid = (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60;
        if !valid {
            return None;
        }

        let days = days_from_civil(i64::from(self.year), self.month, self.day);
        Some(
            days * 86_400
                + i64::from(self.hour) * 3600
                + i64::from(self.minute) * 60
                + i64::from(self.second),
        )
    }
}

// Howard Hinnant's proleptic Gregorian conversions.
fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let mp = (i64::from(month) + 9) % 12;
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// A battery-backed real-time clock chip.
pub trait HardwareClock {
    fn datetime(&mut self) -> impl Future<Output = Result<Timestamp, ClockError>>;

    /// Whether the clock's backup cell has dropped low enough to lose time.
    fn battery_low(&mut self) -> impl Future<Output = Result<bool, ClockError>>;
}

/// Anything the instrument can ask for the current time.
pub trait ClockSource {
    fn now(&self) -> Timestamp;

    fn battery_ok(&self) -> bool;
}

/// Wall clock synchronized once from a [`HardwareClock`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    anchor: Option<(i64, Instant)>,
    battery_ok: bool,
}

impl SystemClock {
    /// Read the RTC once and anchor the monotonic counter to it.
    pub async fn synchronize<H: HardwareClock>(rtc: &mut H) -> Self {
        let battery_ok = match rtc.battery_low().await {
            Ok(low) => !low,
            Err(e) => {
                warn!("Could not read RTC battery flag: {}", e);
                false
            }
        };
        if !battery_ok {
            warn!("RTC backup battery is low; the clock may have lost time");
        }

        let anchor = match rtc.datetime().await {
            Ok(now) if now.is_set() => match now.to_unix() {
                Some(epoch) => {
                    info!("System clock synchronized to {}", now.iso8601());
                    Some((epoch, Instant::now()))
                }
                None => {
                    warn!("RTC returned an out-of-range time: {:?}", now);
                    None
                }
            },
            Ok(_) => {
                warn!("RTC has not been set; timestamps will be unset");
                None
            }
            Err(e) => {
                warn!("Could not read RTC: {}", e);
                None
            }
        };

        Self { anchor, battery_ok }
    }

    pub const fn is_synchronized(&self) -> bool {
        self.anchor.is_some()
    }
}

impl ClockSource for SystemClock {
    fn now(&self) -> Timestamp {
        match self.anchor {
            Some((epoch, at)) => Timestamp::from_unix(epoch + at.elapsed().as_secs() as i64),
            None => Timestamp::UNSET,
        }
    }

    fn battery_ok(&self) -> bool {
        self.battery_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    struct FixedRtc(Result<Timestamp, ClockError>, bool);

    impl HardwareClock for FixedRtc {
        async fn datetime(&mut self) -> Result<Timestamp, ClockError> {
            self.0
        }

        async fn battery_low(&mut self) -> Result<bool, ClockError> {
            Ok(self.1)
        }
    }

    #[test]
    fn test_unix_epoch_is_a_thursday() {
        let ts = Timestamp::from_unix(0);
        assert_eq!((ts.year, ts.month, ts.day), (1970, 1, 1));
        assert_eq!(ts.weekday_name(), Some("Thursday"));
    }

    #[test]
    fn test_civil_round_trip_across_leap_day() {
        // 2024-02-29T12:34:56Z
        let ts = Timestamp::from_unix(1_709_210_096);
        assert_eq!((ts.year, ts.month, ts.day), (2024, 2, 29));
        assert_eq!((ts.hour, ts.minute, ts.second), (12, 34, 56));
        assert_eq!(ts.weekday_name(), Some("Thursday"));
        assert_eq!(ts.to_unix(), Some(1_709_210_096));
    }

    #[test]
    fn test_formatting() {
        let ts = Timestamp {
            year: 2025,
            month: 6,
            day: 1,
            hour: 9,
            minute: 5,
            second: 7,
            weekday: 0,
        };
        assert_eq!(ts.datestamp().as_str(), "20250601");
        assert_eq!(ts.iso8601().as_str(), "20250601T090507Z");
        assert_eq!(ts.weekday_name(), Some("Sunday"));

        let half_past = Timestamp { minute: 30, second: 0, ..ts };
        assert_eq!(half_past.decimal_hour(), 9.5);
    }

    #[test]
    fn test_unset_sentinel() {
        assert!(!Timestamp::UNSET.is_set());
        assert_eq!(Timestamp::UNSET.weekday_name(), None);
        assert_eq!(Timestamp::UNSET.datestamp().as_str(), "20200101");
    }

    #[test]
    fn test_invalid_fields_have_no_epoch() {
        let ts = Timestamp { month: 13, ..Timestamp::from_unix(0) };
        assert_eq!(ts.to_unix(), None);
    }

    #[test]
    fn test_synchronize_from_rtc() {
        let mut rtc = FixedRtc(Ok(Timestamp::from_unix(1_748_736_000)), false);
        let clock = block_on(SystemClock::synchronize(&mut rtc));
        assert!(clock.is_synchronized());
        assert!(clock.battery_ok());
        assert_eq!(clock.now().datestamp().as_str(), "20250601");
    }

    #[test]
    fn test_unset_or_failing_rtc_yields_sentinel() {
        let mut unset = FixedRtc(Ok(Timestamp::UNSET), true);
        let clock = block_on(SystemClock::synchronize(&mut unset));
        assert!(!clock.is_synchronized());
        assert!(!clock.battery_ok());
        assert_eq!(clock.now(), Timestamp::UNSET);

        let mut broken = FixedRtc(
            Err(ClockError::NotResponding { details: "no ack" }),
            false,
        );
        let clock = block_on(SystemClock::synchronize(&mut broken));
        assert_eq!(clock.now(), Timestamp::UNSET);
    }
}
