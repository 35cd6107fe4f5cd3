//! Fiscal-year arithmetic.
//!
//! A fiscal year is named for the calendar year it ends in. With the Texas
//! start month (September), FY2024 runs 2023-09-01 through 2024-08-31.

use chrono::{Datelike, Duration, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiscalCalendar {
    start_month: u32,
}

/// First day of a calendar month. Months outside 1..=12 wrap into the
/// neighbouring year.
fn month_start(year: i32, month0: i32) -> NaiveDate {
    let y = year + month0.div_euclid(12);
    let m = month0.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(NaiveDate::MIN)
}

impl FiscalCalendar {
    /// Calendar whose fiscal year starts on the first of `start_month`
    /// (clamped to 1..=12).
    pub fn new(start_month: u32) -> Self {
        Self {
            start_month: start_month.clamp(1, 12),
        }
    }

    /// Texas state fiscal year: September through August.
    pub fn texas() -> Self {
        Self::new(9)
    }

    /// US federal fiscal year: October through September.
    pub fn federal() -> Self {
        Self::new(10)
    }

    pub fn fiscal_year(&self, date: NaiveDate) -> i32 {
        if self.start_month > 1 && date.month() >= self.start_month {
            date.year() + 1
        } else {
            date.year()
        }
    }

    pub fn start(&self, fy: i32) -> NaiveDate {
        let year = if self.start_month > 1 { fy - 1 } else { fy };
        month_start(year, self.start_month as i32 - 1)
    }

    /// Last day of the fiscal year.
    pub fn end(&self, fy: i32) -> NaiveDate {
        self.start(fy + 1) - Duration::days(1)
    }

    /// Inclusive range of the final `days` days of the fiscal year.
    pub fn final_window(&self, fy: i32, days: u32) -> (NaiveDate, NaiveDate) {
        let end = self.end(fy);
        (end - Duration::days(days.max(1) as i64 - 1), end)
    }

    /// First day of each of the twelve months of the fiscal year.
    pub fn month_starts(&self, fy: i32) -> Vec<NaiveDate> {
        let start = self.start(fy);
        (0..12)
            .map(|i| month_start(start.year(), start.month0() as i32 + i))
            .collect()
    }
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self::texas()
    }
}
