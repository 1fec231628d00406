use chrono::{DateTime, LocalResult, TimeZone, Utc};

use crate::error::{Error, Result};

/// Start of `year` and start of the following year in `tz`, as UTC instants.
pub fn year_range<Tz: TimeZone>(year: i32, tz: &Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    Ok((start_of_year(year, tz)?, start_of_year(year + 1, tz)?))
}

fn start_of_year<Tz: TimeZone>(year: i32, tz: &Tz) -> Result<DateTime<Utc>> {
    match tz.with_ymd_and_hms(year, 1, 1, 0, 0, 0) {
        LocalResult::Single(start) => Ok(start.with_timezone(&Utc)),
        _ => Err(Error::Config {
            reason: format!("invalid year {}", year),
        }),
    }
}
