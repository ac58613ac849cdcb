//! US ski-season holiday calendar.
//!
//! Only the days that reliably pack parking lots: Thanksgiving and the day
//! after, Christmas Eve through New Year's Day, MLK Day and Presidents' Day.

use chrono::{Datelike, NaiveDate, Weekday};

/// `n`th (1-based) `weekday` of a month.
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

pub fn is_ski_holiday(date: NaiveDate) -> bool {
    let year = date.year();
    let (month, day) = (date.month(), date.day());

    match month {
        12 if day >= 24 => true,
        1 if day == 1 => true,
        1 => nth_weekday(year, 1, Weekday::Mon, 3) == Some(date),
        2 => nth_weekday(year, 2, Weekday::Mon, 3) == Some(date),
        11 => {
            let thanksgiving = nth_weekday(year, 11, Weekday::Thu, 4);
            thanksgiving == Some(date) || thanksgiving.and_then(|d| d.succ_opt()) == Some(date)
        }
        _ => false,
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn test_fixed_holidays() {
        assert!(is_ski_holiday(d(2026, 12, 24)));
        assert!(is_ski_holiday(d(2026, 12, 31)));
        assert!(is_ski_holiday(d(2027, 1, 1)));
        assert!(!is_ski_holiday(d(2027, 1, 2)));
        assert!(!is_ski_holiday(d(2026, 12, 23)));
    }

    #[test]
    fn test_monday_holidays() {
        // MLK Day 2026 is Jan 19; Presidents' Day is Feb 16.
        assert!(is_ski_holiday(d(2026, 1, 19)));
        assert!(!is_ski_holiday(d(2026, 1, 12)));
        assert!(is_ski_holiday(d(2026, 2, 16)));
    }

    #[test]
    fn test_thanksgiving_weekend() {
        // Thanksgiving 2026 is Nov 26.
        assert!(is_ski_holiday(d(2026, 11, 26)));
        assert!(is_ski_holiday(d(2026, 11, 27)));
        assert!(!is_ski_holiday(d(2026, 11, 25)));
    }

    #[test]
    fn test_weekend() {
        assert!(is_weekend(d(2026, 1, 10)));
        assert!(!is_weekend(d(2026, 1, 13)));
    }
}
