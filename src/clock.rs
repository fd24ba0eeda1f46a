//! Calendar view of message timestamps

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, Utc};

/// Display format of a message line prefix.
pub const STAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";
/// Date key used in split file names.
pub const DAY_FORMAT: &str = "%Y%m%d";

/// Timezone used to render timestamps and group them into days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl Clock {
    pub fn utc() -> Self {
        Self::Fixed(Utc.fix())
    }

    /// Wall-clock time of a millisecond epoch timestamp.
    pub fn datetime(&self, ts_millis: i64) -> NaiveDateTime {
        let Some(utc) = DateTime::from_timestamp_millis(ts_millis) else {
            return NaiveDateTime::default();
        };
        match self {
            Self::Local => utc.with_timezone(&Local).naive_local(),
            Self::Fixed(offset) => utc.with_timezone(offset).naive_local(),
        }
    }

    pub fn date(&self, ts_millis: i64) -> NaiveDate {
        self.datetime(ts_millis).date()
    }

    /// `dd/mm/YYYY, HH:MM:SS`
    pub fn stamp(&self, ts_millis: i64) -> String {
        self.datetime(ts_millis).format(STAMP_FORMAT).to_string()
    }

    /// `YYYYMMDD`
    pub fn day_key(&self, ts_millis: i64) -> String {
        self.datetime(ts_millis).format(DAY_FORMAT).to_string()
    }
}

/// Parse a cutoff date given as `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    let s = s.trim();
    if s.len() == 8 {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
            return Ok(d);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    Err(format!(
        "Invalid date \"{}\" (expected YYYYMMDD or YYYY-MM-DD)",
        s
    ))
}
