//! Return periods and analysis windows.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::ReconError;

/// A monthly return period. Canonical text form is `MMYYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    /// Parse `MMYYYY` (e.g. `012025`) or `YYYY-MM`.
    pub fn parse(s: &str) -> Result<Self, ReconError> {
        let s = s.trim();
        let bad = || ReconError::InvalidPeriod(s.to_string());

        let (year, month) = if let Some((y, m)) = s.split_once('-') {
            (y.parse::<i32>().map_err(|_| bad())?, m.parse::<u32>().map_err(|_| bad())?)
        } else if s.len() == 6 && s.chars().all(|c| c.is_ascii_digit()) {
            (s[2..].parse::<i32>().map_err(|_| bad())?, s[..2].parse::<u32>().map_err(|_| bad())?)
        } else {
            return Err(bad());
        };

        if !(1..=12).contains(&month) {
            return Err(bad());
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn window(&self) -> Window {
        Window {
            start: self.first_day(),
            end: self.last_day(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}{:04}", self.month, self.year)
    }
}

/// Inclusive date range used for graph-wide analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
