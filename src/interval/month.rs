use std::fmt;
use std::fmt::Formatter;

use jiff::civil::Date;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("{0}")]
pub struct ParseError(pub String);

/// A calendar month, e.g. 2024-03.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Month {
    start: Date,
}

impl Month {
    /// Fails if `month` is not in 1..=12 or the year is out of range.
    pub fn new(year: i16, month: i8) -> Result<Month, ParseError> {
        if !(1..=12).contains(&month) {
            return Err(ParseError(format!("Month of year {} is not in 1..=12", month)));
        }
        let start = Date::new(year, month, 1)
            .map_err(|e| ParseError(format!("Invalid month {}-{:02}: {}", year, month, e)))?;
        Ok(Month { start })
    }

    /// All the months of a year, January first.
    pub fn all_in_year(year: i16) -> Result<Vec<Month>, ParseError> {
        (1..=12).map(|m| Month::new(year, m)).collect()
    }

    pub fn year(&self) -> i16 {
        self.start.year()
    }

    pub fn month(&self) -> i8 {
        self.start.month()
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year(), self.month())
    }
}
