//! Core types for the Flux pipeline
//!
//! Data flows through these stages in order: canonical signals (vendor
//! agnostic), normalized signals, derived signals, contextual signals (with
//! baselines), and finally the HSI payload that leaves the crate as JSON.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw vendor records kept alongside the canonical mapping
pub type VendorRaw = BTreeMap<String, serde_json::Value>;

/// Vendor identifier for provenance tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Whoop,
    Garmin,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Whoop => "whoop",
            Vendor::Garmin => "garmin",
        }
    }
}

impl std::str::FromStr for Vendor {
    type Err = crate::ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whoop" => Ok(Vendor::Whoop),
            "garmin" => Ok(Vendor::Garmin),
            other => Err(crate::ComputeError::UnsupportedVendor(other.to_string())),
        }
    }
}

/// Canonical sleep data extracted from vendor payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSleep {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub time_in_bed_minutes: Option<f64>,
    pub total_sleep_minutes: Option<f64>,
    pub awake_minutes: Option<f64>,
    pub light_sleep_minutes: Option<f64>,
    pub deep_sleep_minutes: Option<f64>,
    pub rem_sleep_minutes: Option<f64>,
    pub awakenings: Option<u32>,
    /// Time to fall asleep (minutes)
    pub latency_minutes: Option<f64>,
    /// Vendor sleep score on the vendor's own scale
    pub vendor_sleep_score: Option<f64>,
    /// Breaths per minute
    pub respiratory_rate: Option<f64>,
}

/// Canonical recovery/physiology data extracted from vendor payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecovery {
    /// Heart rate variability (ms, RMSSD)
    pub hrv_rmssd_ms: Option<f64>,
    pub resting_hr_bpm: Option<f64>,
    /// Vendor recovery score on the vendor's own scale
    pub vendor_recovery_score: Option<f64>,
    pub skin_temp_deviation_c: Option<f64>,
    /// Blood oxygen saturation (0-100)
    pub spo2_percentage: Option<f64>,
}

/// Canonical activity/strain data extracted from vendor payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalActivity {
    /// Vendor strain/load score on the vendor's own scale
    pub vendor_strain_score: Option<f64>,
    /// Total kcal
    pub calories: Option<f64>,
    pub active_calories: Option<f64>,
    pub average_hr_bpm: Option<f64>,
    pub max_hr_bpm: Option<f64>,
    pub distance_meters: Option<f64>,
    pub steps: Option<u32>,
    pub active_minutes: Option<f64>,
}

/// One calendar day of vendor-agnostic wearable data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalWearSignals {
    pub vendor: Vendor,
    /// Local calendar day in `timezone`
    pub date: NaiveDate,
    pub device_id: String,
    /// IANA timezone identifier
    pub timezone: String,
    /// Latest vendor timestamp seen for this day
    pub observed_at: DateTime<Utc>,
    pub sleep: CanonicalSleep,
    pub recovery: CanonicalRecovery,
    pub activity: CanonicalActivity,
    /// Original vendor records keyed by namespace ("sleep", "recovery", "activity")
    pub vendor_raw: VendorRaw,
}

/// Normalized signals with consistent units and scales
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSignals {
    pub canonical: CanonicalWearSignals,
    /// 0-1
    pub sleep_score: Option<f64>,
    /// 0-1
    pub recovery_score: Option<f64>,
    /// 0-1
    pub strain_score: Option<f64>,
    /// Data completeness (0-1)
    pub coverage: f64,
    pub quality_flags: Vec<QualityFlag>,
}

/// Quality flag indicating data issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    MissingSleepData,
    MissingRecoveryData,
    MissingActivityData,
    MissingHrv,
    MissingRestingHr,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::MissingSleepData => "missing_sleep_data",
            QualityFlag::MissingRecoveryData => "missing_recovery_data",
            QualityFlag::MissingActivityData => "missing_activity_data",
            QualityFlag::MissingHrv => "missing_hrv",
            QualityFlag::MissingRestingHr => "missing_resting_hr",
        }
    }
}

/// Derived features computed from normalized signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedSignals {
    pub normalized: NormalizedSignals,
    /// Actual sleep / time in bed (0-1)
    pub sleep_efficiency: Option<f64>,
    /// 0-1, higher = more fragmented
    pub sleep_fragmentation: Option<f64>,
    pub deep_sleep_ratio: Option<f64>,
    pub rem_sleep_ratio: Option<f64>,
    /// Strain adjusted by recovery (0-2)
    pub normalized_load: Option<f64>,
}

/// Where baseline statistics came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineScope {
    /// Only the days contained in the current payload (stateless conversion)
    Payload,
    /// History accumulated by a processor across calls
    Persistent,
}

/// Rolling statistics for one signal, as of the day being scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBaseline {
    /// Mean over the window, including the scored day
    pub mean: f64,
    /// Sample variance (n - 1); absent below two days
    pub variance: Option<f64>,
    pub std_dev: Option<f64>,
    pub sample_days: u32,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Percent change of the scored value against the preceding window mean
    pub deviation_pct: Option<f64>,
    /// Scored value in standard deviations of the preceding window
    pub z_score: Option<f64>,
}

/// Baseline context for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baselines {
    pub scope: BaselineScope,
    pub window_days: u32,
    pub hrv: Option<SignalBaseline>,
    pub resting_hr: Option<SignalBaseline>,
    pub sleep_duration: Option<SignalBaseline>,
    pub sleep_efficiency: Option<SignalBaseline>,
}

impl Baselines {
    pub fn empty(scope: BaselineScope, window_days: u32) -> Self {
        Self {
            scope,
            window_days,
            hrv: None,
            resting_hr: None,
            sleep_duration: None,
            sleep_efficiency: None,
        }
    }

    /// Largest number of days backing any signal
    pub fn baseline_days(&self) -> u32 {
        [
            &self.hrv,
            &self.resting_hr,
            &self.sleep_duration,
            &self.sleep_efficiency,
        ]
        .into_iter()
        .flatten()
        .map(|b| b.sample_days)
        .max()
        .unwrap_or(0)
    }
}

/// Derived signals placed in the context of their baselines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextualSignals {
    pub derived: DerivedSignals,
    pub baselines: Baselines,
}

/// HSI producer metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// HSI provenance information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiProvenance {
    pub source_vendor: String,
    pub source_device_id: String,
    pub observed_at_utc: String,
    pub computed_at_utc: String,
}

/// HSI quality metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiQuality {
    pub coverage: f64,
    /// Seconds between observation and computation
    pub freshness_sec: i64,
    pub confidence: f64,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiSleep {
    pub duration_minutes: Option<f64>,
    pub efficiency: Option<f64>,
    pub fragmentation: Option<f64>,
    pub deep_ratio: Option<f64>,
    pub rem_ratio: Option<f64>,
    pub latency_minutes: Option<f64>,
    pub score: Option<f64>,
    pub vendor: VendorRaw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiPhysiology {
    pub hrv_rmssd_ms: Option<f64>,
    pub resting_hr_bpm: Option<f64>,
    pub respiratory_rate: Option<f64>,
    pub spo2_percentage: Option<f64>,
    pub recovery_score: Option<f64>,
    pub vendor: VendorRaw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiActivity {
    pub strain_score: Option<f64>,
    pub normalized_load: Option<f64>,
    pub calories: Option<f64>,
    pub active_calories: Option<f64>,
    pub steps: Option<u32>,
    pub active_minutes: Option<f64>,
    pub distance_meters: Option<f64>,
    pub vendor: VendorRaw,
}

/// HSI baseline namespace
///
/// The flat fields mirror the per-signal means and deviations for consumers
/// that predate `signals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiBaseline {
    pub scope: BaselineScope,
    pub window_days: u32,
    pub days_in_baseline: u32,
    pub hrv_ms: Option<f64>,
    pub resting_hr_bpm: Option<f64>,
    pub sleep_duration_minutes: Option<f64>,
    pub sleep_efficiency: Option<f64>,
    pub hrv_deviation_pct: Option<f64>,
    pub rhr_deviation_pct: Option<f64>,
    pub sleep_deviation_pct: Option<f64>,
    /// Full statistics keyed by signal name
    pub signals: BTreeMap<String, SignalBaseline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiDailyWindow {
    pub date: NaiveDate,
    pub timezone: String,
    pub sleep: HsiSleep,
    pub physiology: HsiPhysiology,
    pub activity: HsiActivity,
    pub baseline: HsiBaseline,
}

/// Complete HSI payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsiPayload {
    pub hsi_version: String,
    pub producer: HsiProducer,
    pub provenance: HsiProvenance,
    pub quality: HsiQuality,
    pub windows: Vec<HsiDailyWindow>,
}
