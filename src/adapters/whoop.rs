//! WHOOP vendor adapter
//!
//! Accepts an object with optional `sleep`, `recovery` and `cycle` arrays as
//! returned by the WHOOP developer API. Sleep and cycle records are assigned
//! to the local day they start on, recovery records to the day they were
//! created.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::{local_date, parse_rfc3339, raw_value, start_of_day, VendorPayloadAdapter};
use crate::error::ComputeError;
use crate::types::{
    CanonicalActivity, CanonicalRecovery, CanonicalSleep, CanonicalWearSignals, Vendor, VendorRaw,
};

const KJ_TO_KCAL: f64 = 0.239006;

/// WHOOP payload adapter
pub struct WhoopAdapter;

impl VendorPayloadAdapter for WhoopAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Whoop
    }

    fn parse(
        &self,
        raw_json: &str,
        timezone: Tz,
        device_id: &str,
    ) -> Result<Vec<CanonicalWearSignals>, ComputeError> {
        let payload: WhoopPayload = serde_json::from_str(raw_json)?;
        let mut days: BTreeMap<NaiveDate, WhoopDay> = BTreeMap::new();

        for record in payload.sleep.unwrap_or_default() {
            let start = parse_rfc3339("sleep.start", &record.start)?;
            let end = record
                .end
                .as_deref()
                .map(|end| parse_rfc3339("sleep.end", end))
                .transpose()?;
            let day = days.entry(local_date(start, timezone)).or_default();
            day.touch(end.unwrap_or(start));
            day.sleep = Some(Timed { record, start, end });
        }

        for record in payload.recovery.unwrap_or_default() {
            let created = parse_rfc3339("recovery.created_at", &record.created_at)?;
            let day = days.entry(local_date(created, timezone)).or_default();
            day.touch(created);
            day.recovery = Some(record);
        }

        for record in payload.cycle.unwrap_or_default() {
            let start = parse_rfc3339("cycle.start", &record.start)?;
            let end = record
                .end
                .as_deref()
                .map(|end| parse_rfc3339("cycle.end", end))
                .transpose()?;
            let day = days.entry(local_date(start, timezone)).or_default();
            day.touch(end.unwrap_or(start));
            day.cycle = Some(record);
        }

        Ok(days
            .into_iter()
            .map(|(date, day)| day.into_canonical(date, timezone, device_id))
            .collect())
    }
}

struct Timed<T> {
    record: T,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct WhoopDay {
    sleep: Option<Timed<WhoopSleep>>,
    recovery: Option<WhoopRecovery>,
    cycle: Option<WhoopCycle>,
    observed_at: Option<DateTime<Utc>>,
}

impl WhoopDay {
    fn touch(&mut self, at: DateTime<Utc>) {
        self.observed_at = Some(self.observed_at.map_or(at, |seen| seen.max(at)));
    }

    fn into_canonical(
        self,
        date: NaiveDate,
        timezone: Tz,
        device_id: &str,
    ) -> CanonicalWearSignals {
        let mut vendor_raw = VendorRaw::new();

        let sleep = match &self.sleep {
            Some(timed) => {
                vendor_raw.insert("sleep".to_string(), raw_value(&timed.record));
                map_sleep(timed)
            }
            None => CanonicalSleep::default(),
        };

        let recovery = match &self.recovery {
            Some(record) => {
                vendor_raw.insert("recovery".to_string(), raw_value(record));
                map_recovery(record)
            }
            None => CanonicalRecovery::default(),
        };

        let activity = match &self.cycle {
            Some(record) => {
                vendor_raw.insert("activity".to_string(), raw_value(record));
                map_cycle(record)
            }
            None => CanonicalActivity::default(),
        };

        let observed_at = self
            .observed_at
            .or_else(|| start_of_day(date, timezone))
            .unwrap_or_default();

        CanonicalWearSignals {
            vendor: Vendor::Whoop,
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

fn ms_to_minutes(ms: i64) -> f64 {
    ms as f64 / 60_000.0
}

fn map_sleep(timed: &Timed<WhoopSleep>) -> CanonicalSleep {
    let score = timed.record.score.as_ref();
    let stages = score.and_then(|sc| sc.stage_summary.as_ref());

    CanonicalSleep {
        start_time: Some(timed.start),
        end_time: timed.end,
        time_in_bed_minutes: stages.and_then(|st| st.total_in_bed_time_milli).map(ms_to_minutes),
        total_sleep_minutes: stages.and_then(WhoopStageSummary::asleep_minutes),
        awake_minutes: stages.and_then(|st| st.total_awake_time_milli).map(ms_to_minutes),
        light_sleep_minutes: stages
            .and_then(|st| st.total_light_sleep_time_milli)
            .map(ms_to_minutes),
        deep_sleep_minutes: stages
            .and_then(|st| st.total_slow_wave_sleep_time_milli)
            .map(ms_to_minutes),
        rem_sleep_minutes: stages.and_then(|st| st.total_rem_sleep_time_milli).map(ms_to_minutes),
        awakenings: stages.and_then(|st| st.disturbance_count),
        latency_minutes: score
            .and_then(|sc| sc.sleep_latency_time_milli)
            .map(ms_to_minutes),
        vendor_sleep_score: score.and_then(|sc| sc.sleep_performance_percentage),
        respiratory_rate: score.and_then(|sc| sc.respiratory_rate),
    }
}

fn map_recovery(record: &WhoopRecovery) -> CanonicalRecovery {
    let Some(score) = record.score.as_ref() else {
        return CanonicalRecovery::default();
    };
    CanonicalRecovery {
        hrv_rmssd_ms: score.hrv_rmssd_milli,
        resting_hr_bpm: score.resting_heart_rate,
        vendor_recovery_score: score.recovery_score,
        skin_temp_deviation_c: score.skin_temp_celsius,
        spo2_percentage: score.spo2_percentage,
    }
}

fn map_cycle(record: &WhoopCycle) -> CanonicalActivity {
    let Some(score) = record.score.as_ref() else {
        return CanonicalActivity::default();
    };
    // WHOOP cycles carry no steps, distance or active/total calorie split
    CanonicalActivity {
        vendor_strain_score: score.strain,
        calories: score.kilojoule.map(|kj| kj * KJ_TO_KCAL),
        average_hr_bpm: score.average_heart_rate,
        max_hr_bpm: score.max_heart_rate,
        ..Default::default()
    }
}

#[derive(Debug, Deserialize)]
struct WhoopPayload {
    sleep: Option<Vec<WhoopSleep>>,
    recovery: Option<Vec<WhoopRecovery>>,
    cycle: Option<Vec<WhoopCycle>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoopSleep {
    id: Option<i64>,
    start: String,
    end: Option<String>,
    score: Option<WhoopSleepScore>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoopSleepScore {
    stage_summary: Option<WhoopStageSummary>,
    sleep_performance_percentage: Option<f64>,
    sleep_consistency_percentage: Option<f64>,
    sleep_efficiency_percentage: Option<f64>,
    sleep_latency_time_milli: Option<i64>,
    respiratory_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoopStageSummary {
    total_in_bed_time_milli: Option<i64>,
    total_awake_time_milli: Option<i64>,
    total_light_sleep_time_milli: Option<i64>,
    total_slow_wave_sleep_time_milli: Option<i64>,
    total_rem_sleep_time_milli: Option<i64>,
    total_sleep_time_milli: Option<i64>,
    disturbance_count: Option<u32>,
}

impl WhoopStageSummary {
    /// Reported total, or the sum of the three sleep stages
    fn asleep_minutes(&self) -> Option<f64> {
        if let Some(total) = self.total_sleep_time_milli {
            return Some(ms_to_minutes(total));
        }
        let stages = [
            self.total_light_sleep_time_milli?,
            self.total_slow_wave_sleep_time_milli?,
            self.total_rem_sleep_time_milli?,
        ];
        Some(stages.into_iter().map(ms_to_minutes).sum())
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoopRecovery {
    cycle_id: Option<i64>,
    created_at: String,
    score: Option<WhoopRecoveryScore>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoopRecoveryScore {
    recovery_score: Option<f64>,
    resting_heart_rate: Option<f64>,
    hrv_rmssd_milli: Option<f64>,
    spo2_percentage: Option<f64>,
    skin_temp_celsius: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoopCycle {
    id: Option<i64>,
    start: String,
    end: Option<String>,
    score: Option<WhoopCycleScore>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoopCycleScore {
    strain: Option<f64>,
    kilojoule: Option<f64>,
    average_heart_rate: Option<f64>,
    max_heart_rate: Option<f64>,
}
