//! MS-DOS packed date and time as stored in ZIP headers

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Result, ZipError};

/// A date/time pair in MS-DOS format: two-second resolution, years 1980-2107.
///
/// The time word packs `hour << 11 | minute << 5 | second / 2`, the date word
/// packs `(year - 1980) << 9 | month << 5 | day`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl Default for DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    fn default() -> Self {
        Self {
            time: 0,
            date: (1 << 5) | 1,
        }
    }
}

impl DosDateTime {
    pub fn from_raw(time: u16, date: u16) -> Self {
        Self { time, date }
    }

    pub fn year(&self) -> i32 {
        i32::from((self.date & 0xFE00) >> 9) + 1980
    }

    pub fn month(&self) -> u32 {
        ((self.date & 0x1E0) >> 5).into()
    }

    pub fn day(&self) -> u32 {
        (self.date & 0x1F).into()
    }

    pub fn hour(&self) -> u32 {
        ((self.time & 0xF800) >> 11).into()
    }

    pub fn minute(&self) -> u32 {
        ((self.time & 0x7E0) >> 5).into()
    }

    pub fn second(&self) -> u32 {
        ((self.time & 0x1F) << 1).into()
    }

    /// Packs a calendar timestamp, truncating odd seconds.
    pub fn from_chrono(dt: &NaiveDateTime) -> Result<Self> {
        let year = dt.year();
        if !(1980..=2107).contains(&year) {
            return Err(ZipError::DateOutOfRange);
        }

        let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | ((dt.second() as u16) >> 1);

        Ok(Self { time, date })
    }

    /// Unpacks into a calendar timestamp. Returns `None` for field values no
    /// real date has (month 0, hour 31, ...), which some writers emit.
    pub fn to_chrono(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year(), self.month(), self.day())?.and_hms_opt(
            self.hour(),
            self.minute(),
            self.second(),
        )
    }

    /// Current local time, or the default if the clock is outside the range.
    pub fn now() -> Self {
        Self::from_chrono(&Local::now().naive_local()).unwrap_or_default()
    }
}
