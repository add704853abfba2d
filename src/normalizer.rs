//! Signal normalization
//!
//! Vendor scores are rescaled to 0-1 and each day gets a coverage ratio plus
//! quality flags for whatever is missing.

use crate::types::{CanonicalWearSignals, NormalizedSignals, QualityFlag, Vendor};

/// Full-scale value of each vendor score
struct VendorScales {
    sleep: f64,
    recovery: f64,
    strain: f64,
}

impl VendorScales {
    fn of(vendor: Vendor) -> Self {
        match vendor {
            // Sleep performance and recovery are percentages; strain tops out at 21
            Vendor::Whoop => Self {
                sleep: 100.0,
                recovery: 100.0,
                strain: 21.0,
            },
            // Sleep score and Body Battery are 0-100; training load is open-ended
            Vendor::Garmin => Self {
                sleep: 100.0,
                recovery: 100.0,
                strain: 150.0,
            },
        }
    }
}

/// Number of key fields counted towards coverage
const COVERAGE_FIELDS: usize = 6;

/// Normalizer for converting canonical signals to normalized signals
pub struct Normalizer;

impl Normalizer {
    pub fn normalize(signals: &CanonicalWearSignals) -> NormalizedSignals {
        let scales = VendorScales::of(signals.vendor);
        let rescale = |value: Option<f64>, full: f64| value.map(|v| (v / full).clamp(0.0, 1.0));

        let sleep_score = rescale(signals.sleep.vendor_sleep_score, scales.sleep);
        let recovery_score = rescale(signals.recovery.vendor_recovery_score, scales.recovery);
        let strain_score = rescale(signals.activity.vendor_strain_score, scales.strain);

        let checks = [
            (
                signals.sleep.total_sleep_minutes.is_some(),
                Some(QualityFlag::MissingSleepData),
            ),
            (
                signals.recovery.hrv_rmssd_ms.is_some(),
                Some(QualityFlag::MissingHrv),
            ),
            (
                signals.recovery.resting_hr_bpm.is_some(),
                Some(QualityFlag::MissingRestingHr),
            ),
            (
                recovery_score.is_some(),
                Some(QualityFlag::MissingRecoveryData),
            ),
            (
                strain_score.is_some(),
                Some(QualityFlag::MissingActivityData),
            ),
            (
                signals.activity.calories.is_some() || signals.activity.steps.is_some(),
                None,
            ),
        ];

        let present = checks.iter().filter(|(ok, _)| *ok).count();
        let quality_flags = checks
            .iter()
            .filter(|(ok, _)| !ok)
            .filter_map(|(_, flag)| *flag)
            .collect();

        NormalizedSignals {
            canonical: signals.clone(),
            sleep_score,
            recovery_score,
            strain_score,
            coverage: present as f64 / COVERAGE_FIELDS as f64,
            quality_flags,
        }
    }
}
