//! Vendor payload adapters
//!
//! Adapters parse raw vendor JSON and map each calendar day onto
//! [`CanonicalWearSignals`]. Days are bucketed in the user's timezone, so the
//! same UTC instant can land on different dates for different users.

mod garmin;
mod whoop;

pub use garmin::GarminAdapter;
pub use whoop::WhoopAdapter;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::ComputeError;
use crate::types::{CanonicalWearSignals, Vendor};

/// Trait for vendor payload adapters
pub trait VendorPayloadAdapter {
    fn vendor(&self) -> Vendor;

    /// Parse raw JSON into one canonical record per day, ordered by date
    fn parse(
        &self,
        raw_json: &str,
        timezone: Tz,
        device_id: &str,
    ) -> Result<Vec<CanonicalWearSignals>, ComputeError>;
}

/// Adapter for a vendor
pub fn adapter_for(vendor: Vendor) -> &'static dyn VendorPayloadAdapter {
    match vendor {
        Vendor::Whoop => &WhoopAdapter,
        Vendor::Garmin => &GarminAdapter,
    }
}

/// Calendar day of `instant` as seen in `timezone`
pub(crate) fn local_date(instant: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    instant.with_timezone(&timezone).date_naive()
}

/// Start of `date` in `timezone`, as UTC
pub(crate) fn start_of_day(date: NaiveDate, timezone: Tz) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    let start = timezone
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));
    Some(start)
}

pub(crate) fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, ComputeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ComputeError::DateParseError(format!("{field} '{value}': {e}")))
}

pub(crate) fn parse_calendar_date(field: &str, value: &str) -> Result<NaiveDate, ComputeError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| ComputeError::DateParseError(format!("{field} '{value}': {e}")))
}

/// Keep the original vendor record for transparency
pub(crate) fn raw_value<T: Serialize>(record: &T) -> serde_json::Value {
    serde_json::to_value(record).unwrap_or(serde_json::Value::Null)
}
