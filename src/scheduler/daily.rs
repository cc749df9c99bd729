use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, NaiveTime};

/// Local wall-clock time of a daily job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyAt {
    time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Fail)]
#[fail(display = "invalid daily time {:?}, expected HH:MM", _0)]
pub struct ParseDailyAtError(pub String);

impl DailyAt {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|time| Self { time })
    }

    /// The first run strictly after `now`
    pub fn next_run(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.time);
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }

    pub fn wait_from(&self, now: NaiveDateTime) -> ::std::time::Duration {
        (self.next_run(now) - now)
            .to_std()
            .unwrap_or_else(|_| ::std::time::Duration::from_secs(0))
    }
}

impl FromStr for DailyAt {
    type Err = ParseDailyAtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ParseDailyAtError(s.to_string());
        let mut parts = s.trim().splitn(2, ':');
        let hour = parts.next().and_then(|hour| hour.parse::<u32>().ok()).ok_or_else(error)?;
        let minute = parts
            .next()
            .filter(|minute| minute.len() == 2)
            .and_then(|minute| minute.parse::<u32>().ok())
            .ok_or_else(error)?;
        DailyAt::new(hour, minute).ok_or_else(error)
    }
}

impl fmt::Display for DailyAt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.time.format("%H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd(2019, 3, 31).and_hms(h, m, s)
    }

    #[test]
    fn parses_hours_and_minutes() {
        assert_eq!("00:00".parse::<DailyAt>().unwrap(), DailyAt::new(0, 0).unwrap());
        assert_eq!("7:05".parse::<DailyAt>().unwrap(), DailyAt::new(7, 5).unwrap());
        assert_eq!("23:59".parse::<DailyAt>().unwrap().to_string(), "23:59");
    }

    #[test]
    fn rejects_malformed_times() {
        for input in &["24:00", "12:60", "12", "12:5", "noon", "12:30:00", ""] {
            assert!(input.parse::<DailyAt>().is_err(), "{} should not parse", input);
        }
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let daily = DailyAt::new(3, 30).unwrap();
        assert_eq!(daily.next_run(at(1, 0, 0)), at(3, 30, 0));
        assert_eq!(daily.next_run(at(3, 30, 0)), NaiveDate::from_ymd(2019, 4, 1).and_hms(3, 30, 0));
        assert_eq!(daily.next_run(at(23, 59, 59)), NaiveDate::from_ymd(2019, 4, 1).and_hms(3, 30, 0));
    }

    #[test]
    fn wait_covers_the_gap() {
        let daily = DailyAt::new(0, 0).unwrap();
        assert_eq!(daily.wait_from(at(23, 59, 0)), ::std::time::Duration::from_secs(60));
        assert_eq!(daily.wait_from(at(0, 0, 0)), ::std::time::Duration::from_secs(24 * 60 * 60));
    }
}
