//! HSI encoding
//!
//! This module encodes contextual signals into HSI-compliant JSON payloads.
//! Every payload carries exactly one daily window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ComputeError;
use crate::types::{
    Baselines, CanonicalWearSignals, ContextualSignals, HsiActivity, HsiBaseline, HsiDailyWindow,
    HsiPayload, HsiPhysiology, HsiProducer, HsiProvenance, HsiQuality, HsiSleep, SignalBaseline,
    VendorRaw,
};
use crate::{FLUX_VERSION, PRODUCER_NAME};

/// Current HSI schema version
pub const HSI_VERSION: &str = "1.0.0";

/// Baseline days after which confidence gets a bonus
const CONFIDENT_BASELINE_DAYS: u32 = 7;
const BASELINE_CONFIDENCE_BONUS: f64 = 0.1;

/// HSI encoder for producing compliant JSON payloads
#[derive(Debug, Clone)]
pub struct HsiEncoder {
    instance_id: String,
}

impl Default for HsiEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HsiEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn encode(&self, signals: &ContextualSignals) -> HsiPayload {
        self.encode_at(signals, Utc::now())
    }

    /// Encode with an explicit computation timestamp
    pub fn encode_at(&self, signals: &ContextualSignals, computed_at: DateTime<Utc>) -> HsiPayload {
        let canonical = &signals.derived.normalized.canonical;

        HsiPayload {
            hsi_version: HSI_VERSION.to_string(),
            producer: HsiProducer {
                name: PRODUCER_NAME.to_string(),
                version: FLUX_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            provenance: HsiProvenance {
                source_vendor: canonical.vendor.as_str().to_string(),
                source_device_id: canonical.device_id.clone(),
                observed_at_utc: canonical.observed_at.to_rfc3339(),
                computed_at_utc: computed_at.to_rfc3339(),
            },
            quality: build_quality(signals, computed_at),
            windows: vec![build_daily_window(signals)],
        }
    }

    /// Encode a run of days as one JSON array
    pub fn encode_days(&self, days: &[ContextualSignals]) -> Result<String, ComputeError> {
        let payloads: Vec<HsiPayload> = days.iter().map(|day| self.encode(day)).collect();
        serde_json::to_string(&payloads).map_err(|e| ComputeError::EncodingError(e.to_string()))
    }
}

fn build_quality(signals: &ContextualSignals, computed_at: DateTime<Utc>) -> HsiQuality {
    let normalized = &signals.derived.normalized;
    let freshness_sec = (computed_at - normalized.canonical.observed_at).num_seconds();

    let bonus = if signals.baselines.baseline_days() >= CONFIDENT_BASELINE_DAYS {
        BASELINE_CONFIDENCE_BONUS
    } else {
        0.0
    };

    HsiQuality {
        coverage: normalized.coverage,
        freshness_sec,
        confidence: (normalized.coverage + bonus).min(1.0),
        flags: normalized
            .quality_flags
            .iter()
            .map(|f| f.as_str().to_string())
            .collect(),
    }
}

fn build_daily_window(signals: &ContextualSignals) -> HsiDailyWindow {
    let derived = &signals.derived;
    let normalized = &derived.normalized;
    let canonical = &normalized.canonical;

    let sleep = HsiSleep {
        duration_minutes: canonical.sleep.total_sleep_minutes,
        efficiency: derived.sleep_efficiency,
        fragmentation: derived.sleep_fragmentation,
        deep_ratio: derived.deep_sleep_ratio,
        rem_ratio: derived.rem_sleep_ratio,
        latency_minutes: canonical.sleep.latency_minutes,
        score: normalized.sleep_score,
        vendor: vendor_namespace(canonical, "sleep", canonical.sleep.vendor_sleep_score),
    };

    let physiology = HsiPhysiology {
        hrv_rmssd_ms: canonical.recovery.hrv_rmssd_ms,
        resting_hr_bpm: canonical.recovery.resting_hr_bpm,
        respiratory_rate: canonical.sleep.respiratory_rate,
        spo2_percentage: canonical.recovery.spo2_percentage,
        recovery_score: normalized.recovery_score,
        vendor: vendor_namespace(
            canonical,
            "recovery",
            canonical.recovery.vendor_recovery_score,
        ),
    };

    let activity = HsiActivity {
        strain_score: normalized.strain_score,
        normalized_load: derived.normalized_load,
        calories: canonical.activity.calories,
        active_calories: canonical.activity.active_calories,
        steps: canonical.activity.steps,
        active_minutes: canonical.activity.active_minutes,
        distance_meters: canonical.activity.distance_meters,
        vendor: vendor_namespace(
            canonical,
            "activity",
            canonical.activity.vendor_strain_score,
        ),
    };

    HsiDailyWindow {
        date: canonical.date,
        timezone: canonical.timezone.clone(),
        sleep,
        physiology,
        activity,
        baseline: build_baseline(&signals.baselines),
    }
}

fn build_baseline(baselines: &Baselines) -> HsiBaseline {
    let mean = |b: &Option<SignalBaseline>| b.as_ref().map(|b| b.mean);
    let deviation = |b: &Option<SignalBaseline>| b.as_ref().and_then(|b| b.deviation_pct);

    let signals: BTreeMap<String, SignalBaseline> = [
        ("hrv", &baselines.hrv),
        ("resting_hr", &baselines.resting_hr),
        ("sleep_duration", &baselines.sleep_duration),
        ("sleep_efficiency", &baselines.sleep_efficiency),
    ]
    .into_iter()
    .filter_map(|(name, b)| b.clone().map(|b| (name.to_string(), b)))
    .collect();

    HsiBaseline {
        scope: baselines.scope,
        window_days: baselines.window_days,
        days_in_baseline: baselines.baseline_days(),
        hrv_ms: mean(&baselines.hrv),
        resting_hr_bpm: mean(&baselines.resting_hr),
        sleep_duration_minutes: mean(&baselines.sleep_duration),
        sleep_efficiency: mean(&baselines.sleep_efficiency),
        hrv_deviation_pct: deviation(&baselines.hrv),
        rhr_deviation_pct: deviation(&baselines.resting_hr),
        sleep_deviation_pct: deviation(&baselines.sleep_duration),
        signals,
    }
}

/// Vendor score under `{vendor}_{score}` plus the original record as `raw`
fn vendor_namespace(
    canonical: &CanonicalWearSignals,
    namespace: &str,
    score: Option<f64>,
) -> VendorRaw {
    let score_name = match namespace {
        "sleep" => "sleep_score",
        "recovery" => "recovery_score",
        _ => "strain_score",
    };

    let mut vendor = VendorRaw::new();
    if let Some(score) = score {
        vendor.insert(
            format!("{}_{score_name}", canonical.vendor.as_str()),
            serde_json::Value::from(score),
        );
    }
    if let Some(raw) = canonical.vendor_raw.get(namespace) {
        vendor.insert("raw".to_string(), raw.clone());
    }
    vendor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BaselineScope, CanonicalActivity, CanonicalRecovery, CanonicalSleep, DerivedSignals,
        NormalizedSignals, QualityFlag, Vendor,
    };
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    fn hrv_baseline(sample_days: u32) -> SignalBaseline {
        SignalBaseline {
            mean: 62.0,
            variance: Some(4.0),
            std_dev: Some(2.0),
            sample_days,
            window_start: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            window_end: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            deviation_pct: Some(4.8),
            z_score: Some(1.5),
        }
    }

    fn make_test_contextual(baselines: Baselines) -> ContextualSignals {
        let mut vendor_raw = VendorRaw::new();
        vendor_raw.insert("sleep".to_string(), serde_json::json!({"id": 1}));

        let canonical = CanonicalWearSignals {
            vendor: Vendor::Whoop,
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            device_id: "test-device".to_string(),
            timezone: "America/New_York".to_string(),
            observed_at: "2024-01-15T12:00:00Z".parse().unwrap(),
            sleep: CanonicalSleep {
                total_sleep_minutes: Some(420.0),
                time_in_bed_minutes: Some(480.0),
                vendor_sleep_score: Some(85.0),
                latency_minutes: Some(12.0),
                respiratory_rate: Some(14.5),
                ..Default::default()
            },
            recovery: CanonicalRecovery {
                hrv_rmssd_ms: Some(65.0),
                resting_hr_bpm: Some(55.0),
                vendor_recovery_score: Some(75.0),
                spo2_percentage: Some(97.0),
                ..Default::default()
            },
            activity: CanonicalActivity {
                vendor_strain_score: Some(12.5),
                calories: Some(2200.0),
                steps: Some(8500),
                ..Default::default()
            },
            vendor_raw,
        };

        let normalized = NormalizedSignals {
            canonical,
            sleep_score: Some(0.85),
            recovery_score: Some(0.75),
            strain_score: Some(0.595),
            coverage: 0.8,
            quality_flags: vec![QualityFlag::MissingActivityData],
        };

        ContextualSignals {
            derived: DerivedSignals {
                normalized,
                sleep_efficiency: Some(0.875),
                sleep_fragmentation: Some(0.05),
                deep_sleep_ratio: Some(0.2),
                rem_sleep_ratio: Some(0.25),
                normalized_load: Some(0.79),
            },
            baselines,
        }
    }

    #[test]
    fn test_encode_hsi_payload() {
        let mut baselines = Baselines::empty(BaselineScope::Persistent, 14);
        baselines.hrv = Some(hrv_baseline(14));
        let signals = make_test_contextual(baselines);
        let encoder = HsiEncoder::with_instance_id("test-instance".to_string());
        let computed_at = signals.derived.normalized.canonical.observed_at + Duration::seconds(90);
        let payload = encoder.encode_at(&signals, computed_at);

        assert_eq!(payload.hsi_version, HSI_VERSION);
        assert_eq!(payload.producer.name, PRODUCER_NAME);
        assert_eq!(payload.producer.instance_id, "test-instance");
        assert_eq!(payload.provenance.source_vendor, "whoop");
        assert_eq!(payload.quality.freshness_sec, 90);
        assert!((payload.quality.confidence - 0.9).abs() < 1e-9);
        assert_eq!(payload.quality.flags, vec!["missing_activity_data".to_string()]);

        let window = &payload.windows[0];
        assert_eq!(window.date.to_string(), "2024-01-15");
        assert_eq!(window.sleep.vendor["whoop_sleep_score"], 85.0);
        assert_eq!(window.sleep.vendor["raw"]["id"], 1);
        assert!(!window.physiology.vendor.contains_key("raw"));

        let baseline = &window.baseline;
        assert_eq!(baseline.scope, BaselineScope::Persistent);
        assert_eq!(baseline.hrv_ms, Some(62.0));
        assert_eq!(baseline.hrv_deviation_pct, Some(4.8));
        assert_eq!(baseline.resting_hr_bpm, None);
        assert_eq!(baseline.days_in_baseline, 14);
        assert_eq!(baseline.signals.keys().collect::<Vec<_>>(), vec!["hrv"]);
    }

    #[test]
    fn test_confidence_without_baseline_history() {
        let mut baselines = Baselines::empty(BaselineScope::Payload, 14);
        baselines.hrv = Some(hrv_baseline(3));
        let payload = HsiEncoder::new().encode(&make_test_contextual(baselines));
        assert!((payload.quality.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_encode_days_json_shape() {
        let signals = make_test_contextual(Baselines::empty(BaselineScope::Payload, 14));
        let json = HsiEncoder::new()
            .encode_days(&[signals.clone(), signals])
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let days = parsed.as_array().unwrap();
        assert_eq!(days.len(), 2);
        for key in ["hsi_version", "producer", "provenance", "quality", "windows"] {
            assert!(days[0].get(key).is_some(), "missing {key}");
        }
        assert_eq!(days[0]["windows"][0]["baseline"]["scope"], "payload");
        assert_eq!(days[0]["windows"][0]["baseline"]["signals"], serde_json::json!({}));
    }
}
