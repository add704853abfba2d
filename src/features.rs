//! Feature derivation
//!
//! Sleep architecture ratios and a recovery-adjusted load, all computed from
//! one day's normalized signals.

use crate::types::{CanonicalSleep, DerivedSignals, NormalizedSignals};

/// Awakenings per hour of sleep treated as fully fragmented
const MAX_AWAKENINGS_PER_HOUR: f64 = 6.0;

/// Upper bound on strain relative to recovery
const MAX_NORMALIZED_LOAD: f64 = 2.0;

/// Feature deriver for computing derived signals
pub struct FeatureDeriver;

impl FeatureDeriver {
    pub fn derive(normalized: NormalizedSignals) -> DerivedSignals {
        let sleep = &normalized.canonical.sleep;

        let sleep_efficiency = unit_ratio(sleep.total_sleep_minutes, sleep.time_in_bed_minutes);
        let sleep_fragmentation = fragmentation(sleep);
        let deep_sleep_ratio = unit_ratio(sleep.deep_sleep_minutes, sleep.total_sleep_minutes);
        let rem_sleep_ratio = unit_ratio(sleep.rem_sleep_minutes, sleep.total_sleep_minutes);
        let normalized_load = load(normalized.strain_score, normalized.recovery_score);

        DerivedSignals {
            normalized,
            sleep_efficiency,
            sleep_fragmentation,
            deep_sleep_ratio,
            rem_sleep_ratio,
            normalized_load,
        }
    }
}

/// `part / whole` clamped to 0-1; undefined for an empty whole
fn unit_ratio(part: Option<f64>, whole: Option<f64>) -> Option<f64> {
    match (part, whole) {
        (Some(part), Some(whole)) if whole > 0.0 => Some((part / whole).clamp(0.0, 1.0)),
        _ => None,
    }
}

/// Awakenings per hour scaled to 0-1, falling back to the awake share of time in bed
fn fragmentation(sleep: &CanonicalSleep) -> Option<f64> {
    match (sleep.awakenings, sleep.total_sleep_minutes) {
        (Some(awakenings), Some(asleep)) if asleep > 0.0 => {
            let per_hour = f64::from(awakenings) / (asleep / 60.0);
            Some((per_hour / MAX_AWAKENINGS_PER_HOUR).clamp(0.0, 1.0))
        }
        _ => unit_ratio(sleep.awake_minutes, sleep.time_in_bed_minutes),
    }
}

/// Share of recovery capacity used; raw strain when recovery is unknown
fn load(strain: Option<f64>, recovery: Option<f64>) -> Option<f64> {
    match (strain, recovery) {
        (Some(strain), Some(recovery)) if recovery > 0.0 => {
            Some((strain / recovery).clamp(0.0, MAX_NORMALIZED_LOAD))
        }
        (Some(strain), None) => Some(strain),
        _ => None,
    }
}
