//! Garmin vendor adapter
//!
//! Accepts an object with optional `dailies` and `sleep` arrays from the
//! Garmin Health API. Records already carry a local `calendarDate`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::{parse_calendar_date, raw_value, start_of_day, VendorPayloadAdapter};
use crate::error::ComputeError;
use crate::types::{
    CanonicalActivity, CanonicalRecovery, CanonicalSleep, CanonicalWearSignals, Vendor, VendorRaw,
};

/// Garmin payload adapter
pub struct GarminAdapter;

impl VendorPayloadAdapter for GarminAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Garmin
    }

    fn parse(
        &self,
        raw_json: &str,
        timezone: Tz,
        device_id: &str,
    ) -> Result<Vec<CanonicalWearSignals>, ComputeError> {
        let payload: GarminPayload = serde_json::from_str(raw_json)?;
        let mut days: BTreeMap<NaiveDate, GarminDay> = BTreeMap::new();

        for daily in payload.dailies.unwrap_or_default() {
            let date = parse_calendar_date("dailies.calendarDate", &daily.calendar_date)?;
            days.entry(date).or_default().daily = Some(daily);
        }

        for sleep in payload.sleep.unwrap_or_default() {
            let date = parse_calendar_date("sleep.calendarDate", &sleep.calendar_date)?;
            days.entry(date).or_default().sleep = Some(sleep);
        }

        Ok(days
            .into_iter()
            .map(|(date, day)| day.into_canonical(date, timezone, device_id))
            .collect())
    }
}

#[derive(Default)]
struct GarminDay {
    daily: Option<GarminDaily>,
    sleep: Option<GarminSleep>,
}

impl GarminDay {
    fn into_canonical(
        self,
        date: NaiveDate,
        timezone: Tz,
        device_id: &str,
    ) -> CanonicalWearSignals {
        let mut vendor_raw = VendorRaw::new();

        let sleep = match &self.sleep {
            Some(record) => {
                vendor_raw.insert("sleep".to_string(), raw_value(record));
                map_sleep(record)
            }
            None => CanonicalSleep::default(),
        };

        let (recovery, activity) = match &self.daily {
            Some(record) => {
                // One daily summary feeds both namespaces
                vendor_raw.insert("recovery".to_string(), raw_value(record));
                vendor_raw.insert("activity".to_string(), raw_value(record));
                (map_recovery(record), map_activity(record))
            }
            None => (CanonicalRecovery::default(), CanonicalActivity::default()),
        };

        let observed_at = sleep
            .end_time
            .or_else(|| start_of_day(date, timezone))
            .unwrap_or_default();

        CanonicalWearSignals {
            vendor: Vendor::Garmin,
            date,
            device_id: device_id.to_string(),
            timezone: timezone.name().to_string(),
            observed_at,
            sleep,
            recovery,
            activity,
            vendor_raw,
        }
    }
}

fn secs_to_minutes(secs: i64) -> f64 {
    secs as f64 / 60.0
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn map_sleep(record: &GarminSleep) -> CanonicalSleep {
    let start_time = from_millis(record.sleep_start_timestamp_gmt);
    let end_time = from_millis(record.sleep_end_timestamp_gmt);
    let asleep = record.sleep_time_seconds.map(secs_to_minutes);
    let awake = record.awake_sleep_seconds.map(secs_to_minutes);

    // In-bed time is the sleep window when known, otherwise asleep + awake
    let in_bed = match (start_time, end_time) {
        (Some(start), Some(end)) if end > start => Some((end - start).num_seconds() as f64 / 60.0),
        _ => asleep.map(|a| a + awake.unwrap_or(0.0)),
    };

    CanonicalSleep {
        start_time,
        end_time,
        time_in_bed_minutes: in_bed,
        total_sleep_minutes: asleep,
        awake_minutes: awake,
        light_sleep_minutes: record.light_sleep_seconds.map(secs_to_minutes),
        deep_sleep_minutes: record.deep_sleep_seconds.map(secs_to_minutes),
        rem_sleep_minutes: record.rem_sleep_seconds.map(secs_to_minutes),
        awakenings: record.awake_count,
        latency_minutes: None,
        vendor_sleep_score: record.sleep_scores.as_ref().and_then(|sc| sc.overall_score),
        respiratory_rate: record.avg_sleep_respiration,
    }
}

fn map_recovery(record: &GarminDaily) -> CanonicalRecovery {
    CanonicalRecovery {
        hrv_rmssd_ms: record.resting_heart_rate_hrv,
        resting_hr_bpm: record.resting_heart_rate.map(f64::from),
        // Body Battery stands in for a recovery score
        vendor_recovery_score: record.body_battery_charged_value.map(f64::from),
        skin_temp_deviation_c: None,
        spo2_percentage: record.avg_spo2_value,
    }
}

fn map_activity(record: &GarminDaily) -> CanonicalActivity {
    let active_minutes = match (
        record.moderate_intensity_minutes,
        record.vigorous_intensity_minutes,
    ) {
        (None, None) => None,
        (moderate, vigorous) => Some(
            moderate.map_or(0.0, f64::from) + vigorous.map_or(0.0, f64::from),
        ),
    };

    CanonicalActivity {
        vendor_strain_score: record.training_load_balance,
        calories: record.total_kilocalories.map(f64::from),
        active_calories: record.active_kilocalories.map(f64::from),
        average_hr_bpm: record.average_heart_rate.map(f64::from),
        max_hr_bpm: record.max_heart_rate.map(f64::from),
        distance_meters: record.total_distance_meters.map(|m| m as f64),
        steps: record.total_steps,
        active_minutes,
    }
}

#[derive(Debug, Deserialize)]
struct GarminPayload {
    dailies: Option<Vec<GarminDaily>>,
    sleep: Option<Vec<GarminSleep>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct GarminDaily {
    calendar_date: String,
    total_steps: Option<u32>,
    total_distance_meters: Option<i64>,
    total_kilocalories: Option<i32>,
    active_kilocalories: Option<i32>,
    resting_heart_rate: Option<i32>,
    resting_heart_rate_hrv: Option<f64>,
    average_heart_rate: Option<i32>,
    max_heart_rate: Option<i32>,
    avg_spo2_value: Option<f64>,
    body_battery_charged_value: Option<i32>,
    body_battery_drained_value: Option<i32>,
    training_load_balance: Option<f64>,
    moderate_intensity_minutes: Option<i32>,
    vigorous_intensity_minutes: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct GarminSleep {
    calendar_date: String,
    sleep_start_timestamp_gmt: Option<i64>,
    sleep_end_timestamp_gmt: Option<i64>,
    sleep_time_seconds: Option<i64>,
    awake_sleep_seconds: Option<i64>,
    light_sleep_seconds: Option<i64>,
    deep_sleep_seconds: Option<i64>,
    rem_sleep_seconds: Option<i64>,
    awake_count: Option<u32>,
    avg_sleep_respiration: Option<f64>,
    sleep_scores: Option<GarminSleepScores>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct GarminSleepScores {
    overall_score: Option<f64>,
    quality_score: Option<f64>,
    recovery_score: Option<f64>,
}
