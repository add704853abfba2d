//! Rolling baselines
//!
//! A [`BaselineStore`] keeps one rolling window of daily samples per
//! `(device id, signal)` pair. Each window covers `window_days` calendar days
//! ending at the latest date seen for that key and holds at most one sample
//! per day; a second sample for a day replaces the first.
//!
//! Scoring a day yields two views of the window:
//! - the baseline *including* the day (mean, sample variance, bounds), and
//! - its deviation and z-score against the `window_days` days *preceding* it.
//!
//! The whole store serializes to a versioned snapshot document that
//! reconstructs it exactly.

use std::collections::{BTreeMap, VecDeque};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::types::{BaselineScope, Baselines, ContextualSignals, DerivedSignals, SignalBaseline};

pub use crate::config::DEFAULT_BASELINE_WINDOW;

/// Format tag written into every snapshot
pub const SNAPSHOT_FORMAT: &str = "flux.baselines";

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Daily signals tracked against a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSignal {
    /// HRV RMSSD (ms)
    Hrv,
    /// Resting heart rate (bpm)
    RestingHr,
    /// Total sleep (minutes)
    SleepDuration,
    /// Sleep efficiency (0-1)
    SleepEfficiency,
}

impl BaselineSignal {
    pub const ALL: [BaselineSignal; 4] = [
        BaselineSignal::Hrv,
        BaselineSignal::RestingHr,
        BaselineSignal::SleepDuration,
        BaselineSignal::SleepEfficiency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineSignal::Hrv => "hrv",
            BaselineSignal::RestingHr => "resting_hr",
            BaselineSignal::SleepDuration => "sleep_duration",
            BaselineSignal::SleepEfficiency => "sleep_efficiency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaselineKey {
    pub device_id: String,
    pub signal: BaselineSignal,
}

impl BaselineKey {
    pub fn new(device_id: &str, signal: BaselineSignal) -> Self {
        Self {
            device_id: device_id.to_string(),
            signal,
        }
    }
}

/// One day's aggregate value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailySample {
    pub date: NaiveDate,
    pub value: f64,
}

/// Summary statistics over a set of daily samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub count: u32,
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub mean: f64,
    /// Sample variance (n - 1); `None` below two samples
    pub variance: Option<f64>,
}

impl WindowStats {
    fn over<'a>(samples: impl Iterator<Item = &'a DailySample> + Clone) -> Option<Self> {
        let mut iter = samples.clone();
        let first = iter.next()?;
        let (count, last, sum) = samples.clone().fold(
            (0u32, first.date, 0.0),
            |(count, last, sum), s| (count + 1, last.max(s.date), sum + s.value),
        );
        let mean = sum / f64::from(count);
        let variance = (count >= 2).then(|| {
            let squares: f64 = samples.map(|s| (s.value - mean).powi(2)).sum();
            squares / f64::from(count - 1)
        });

        Some(Self {
            count,
            first: first.date,
            last,
            mean,
            variance,
        })
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance.map(f64::sqrt)
    }
}

/// First date still inside a window of `window_days` ending on `end`
fn window_start(end: NaiveDate, window_days: u32) -> NaiveDate {
    end.checked_sub_days(Days::new(u64::from(window_days.saturating_sub(1))))
        .unwrap_or(NaiveDate::MIN)
}

/// Date-ordered daily samples for one key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollingWindow {
    samples: VecDeque<DailySample>,
}

impl RollingWindow {
    pub fn samples(&self) -> impl Iterator<Item = &DailySample> + Clone {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<NaiveDate> {
        self.samples.back().map(|s| s.date)
    }

    pub fn stats(&self) -> Option<WindowStats> {
        WindowStats::over(self.samples.iter())
    }

    /// Stats over the `window_days` days strictly before `date`
    fn stats_before(&self, date: NaiveDate, window_days: u32) -> Option<WindowStats> {
        let end = date.pred_opt()?;
        let start = window_start(end, window_days);
        WindowStats::over(
            self.samples
                .iter()
                .filter(move |s| s.date >= start && s.date <= end),
        )
    }

    /// Insert or replace the sample for its date, then evict.
    ///
    /// Returns `false` without changes when the sample is older than the
    /// window ending at the latest known date.
    fn record(&mut self, sample: DailySample, window_days: u32) -> bool {
        if let Some(latest) = self.latest() {
            if sample.date < window_start(latest, window_days) {
                return false;
            }
        }
        match self.samples.binary_search_by(|s| s.date.cmp(&sample.date)) {
            Ok(i) => self.samples[i].value = sample.value,
            Err(i) => self.samples.insert(i, sample),
        }
        self.evict(window_days);
        true
    }

    fn evict(&mut self, window_days: u32) {
        let Some(latest) = self.latest() else {
            return;
        };
        let start = window_start(latest, window_days);
        while self.samples.front().is_some_and(|s| s.date < start) {
            self.samples.pop_front();
        }
    }
}

/// Rolling windows keyed by device and signal
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineStore {
    window_days: u32,
    scope: BaselineScope,
    windows: BTreeMap<BaselineKey, RollingWindow>,
}

impl Default for BaselineStore {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_WINDOW)
    }
}

impl BaselineStore {
    /// Store whose history persists across conversions
    pub fn new(window_days: u32) -> Self {
        Self {
            window_days: window_days.max(1),
            scope: BaselineScope::Persistent,
            windows: BTreeMap::new(),
        }
    }

    /// Store that only ever sees a single payload
    pub fn ephemeral(window_days: u32) -> Self {
        Self {
            scope: BaselineScope::Payload,
            ..Self::new(window_days)
        }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn scope(&self) -> BaselineScope {
        self.scope
    }

    /// Number of tracked `(device, signal)` keys
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn window(&self, device_id: &str, signal: BaselineSignal) -> Option<&RollingWindow> {
        self.windows.get(&BaselineKey::new(device_id, signal))
    }

    pub fn keys(&self) -> impl Iterator<Item = &BaselineKey> {
        self.windows.keys()
    }

    /// Record `value` for `date` and score it against the window.
    ///
    /// A missing or non-finite value leaves the window untouched and reports
    /// the existing baseline, if any, without deviation.
    pub fn observe(
        &mut self,
        device_id: &str,
        signal: BaselineSignal,
        date: NaiveDate,
        value: Option<f64>,
    ) -> Option<SignalBaseline> {
        let window_days = self.window_days;
        let key = BaselineKey::new(device_id, signal);

        let Some(value) = value.filter(|v| v.is_finite()) else {
            return self
                .windows
                .get(&key)
                .and_then(RollingWindow::stats)
                .map(|current| signal_baseline(current, None));
        };

        let window = self.windows.entry(key).or_default();
        let prior = window.stats_before(date, window_days);
        if !window.record(DailySample { date, value }, window_days) {
            tracing::debug!(
                device_id,
                signal = signal.as_str(),
                %date,
                "Sample older than baseline window ignored"
            );
            return window.stats().map(|current| signal_baseline(current, None));
        }

        window
            .stats()
            .map(|current| signal_baseline(current, prior.map(|p| (p, value))))
    }

    /// Update baselines with one day of derived signals and return the day in context
    pub fn update_and_contextualize(&mut self, derived: DerivedSignals) -> ContextualSignals {
        let canonical = &derived.normalized.canonical;
        let device_id = canonical.device_id.clone();
        let date = canonical.date;

        let hrv = self.observe(
            &device_id,
            BaselineSignal::Hrv,
            date,
            canonical.recovery.hrv_rmssd_ms,
        );
        let resting_hr = self.observe(
            &device_id,
            BaselineSignal::RestingHr,
            date,
            canonical.recovery.resting_hr_bpm,
        );
        let sleep_duration = self.observe(
            &device_id,
            BaselineSignal::SleepDuration,
            date,
            canonical.sleep.total_sleep_minutes,
        );
        let sleep_efficiency = self.observe(
            &device_id,
            BaselineSignal::SleepEfficiency,
            date,
            derived.sleep_efficiency,
        );

        ContextualSignals {
            derived,
            baselines: Baselines {
                scope: self.scope,
                window_days: self.window_days,
                hrv,
                resting_hr,
                sleep_duration,
                sleep_efficiency,
            },
        }
    }

    pub fn snapshot(&self) -> BaselineSnapshot {
        BaselineSnapshot {
            format: SNAPSHOT_FORMAT.to_string(),
            version: SNAPSHOT_VERSION,
            window_days: self.window_days,
            entries: self
                .windows
                .iter()
                .map(|(key, window)| SnapshotEntry {
                    device_id: key.device_id.clone(),
                    signal: key.signal,
                    samples: window.samples().copied().collect(),
                })
                .collect(),
        }
    }

    /// Rebuild a store, rejecting any snapshot that violates store invariants
    pub fn from_snapshot(snapshot: BaselineSnapshot) -> Result<Self, ComputeError> {
        let invalid = |msg: String| ComputeError::BaselineFormat(msg);

        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(invalid(format!("unexpected format '{}'", snapshot.format)));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(invalid(format!("unsupported version {}", snapshot.version)));
        }
        if snapshot.window_days == 0 {
            return Err(invalid("window_days must be positive".to_string()));
        }

        let mut store = Self::new(snapshot.window_days);
        for entry in snapshot.entries {
            let label = format!("{}/{}", entry.device_id, entry.signal.as_str());
            if entry.device_id.trim().is_empty() {
                return Err(invalid("entry with empty device_id".to_string()));
            }
            let (Some(first), Some(last)) = (entry.samples.first(), entry.samples.last()) else {
                return Err(invalid(format!("{label}: no samples")));
            };
            if first.date < window_start(last.date, store.window_days) {
                return Err(invalid(format!(
                    "{label}: samples span more than {} days",
                    store.window_days
                )));
            }
            if entry.samples.windows(2).any(|pair| pair[0].date >= pair[1].date) {
                return Err(invalid(format!("{label}: dates not strictly increasing")));
            }
            if entry.samples.iter().any(|s| !s.value.is_finite()) {
                return Err(invalid(format!("{label}: non-finite value")));
            }

            let key = BaselineKey {
                device_id: entry.device_id,
                signal: entry.signal,
            };
            let window = RollingWindow {
                samples: entry.samples.into(),
            };
            if store.windows.insert(key, window).is_some() {
                return Err(invalid(format!("{label}: duplicate entry")));
            }
        }
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        serde_json::to_string(&self.snapshot())
            .map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let snapshot: BaselineSnapshot =
            serde_json::from_str(json).map_err(|e| ComputeError::BaselineFormat(e.to_string()))?;
        Self::from_snapshot(snapshot)
    }
}

fn signal_baseline(current: WindowStats, scored: Option<(WindowStats, f64)>) -> SignalBaseline {
    let deviation_pct = scored.and_then(|(prior, value)| {
        (prior.mean > 0.0).then(|| (value - prior.mean) / prior.mean * 100.0)
    });
    let z_score = scored.and_then(|(prior, value)| {
        prior
            .std_dev()
            .filter(|sd| *sd > 0.0)
            .map(|sd| (value - prior.mean) / sd)
    });

    SignalBaseline {
        mean: current.mean,
        variance: current.variance,
        std_dev: current.std_dev(),
        sample_days: current.count,
        window_start: current.first,
        window_end: current.last,
        deviation_pct,
        z_score,
    }
}

/// Serialized form of a [`BaselineStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaselineSnapshot {
    pub format: String,
    pub version: u32,
    pub window_days: u32,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotEntry {
    pub device_id: String,
    pub signal: BaselineSignal,
    pub samples: Vec<DailySample>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Days::new(u64::from(n))
    }

    fn feed(store: &mut BaselineStore, values: &[f64]) -> Option<SignalBaseline> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| store.observe("dev", BaselineSignal::Hrv, day(i as u32), Some(*v)))
            .last()
            .flatten()
    }

    #[test]
    fn test_fourteen_day_mean_and_variance() {
        let mut store = BaselineStore::new(14);
        let values: Vec<f64> = (1..=14).map(|i| 50.0 + f64::from(i)).collect();
        let last = feed(&mut store, &values).unwrap();

        // 51..=64: mean 57.5, sample variance n(n+1)/12 = 17.5
        assert_eq!(last.sample_days, 14);
        assert!((last.mean - 57.5).abs() < 1e-12);
        assert!((last.variance.unwrap() - 17.5).abs() < 1e-12);
        assert!((last.std_dev.unwrap() - 17.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(last.window_start, day(0));
        assert_eq!(last.window_end, day(13));

        // Against the 13 preceding days (51..=63, mean 57, variance 15.1667)
        let prior_var: f64 = 13.0 * 14.0 / 12.0;
        assert!((last.deviation_pct.unwrap() - (64.0 - 57.0) / 57.0 * 100.0).abs() < 1e-9);
        assert!((last.z_score.unwrap() - 7.0 / prior_var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample_has_no_spread() {
        let mut store = BaselineStore::new(7);
        let first = store
            .observe("dev", BaselineSignal::RestingHr, day(0), Some(55.0))
            .unwrap();
        assert_eq!(first.sample_days, 1);
        assert_eq!(first.mean, 55.0);
        assert_eq!(first.variance, None);
        assert_eq!(first.deviation_pct, None);
        assert_eq!(first.z_score, None);
    }

    #[test]
    fn test_window_eviction() {
        let mut store = BaselineStore::new(3);
        let last = feed(&mut store, &[60.0, 70.0, 80.0, 90.0, 100.0]).unwrap();
        assert_eq!(last.sample_days, 3);
        assert!((last.mean - 90.0).abs() < 1e-12);

        // Changing an evicted day does not change the outcome
        let mut other = BaselineStore::new(3);
        let other_last = feed(&mut other, &[1000.0, 70.0, 80.0, 90.0, 100.0]).unwrap();
        assert_eq!(last, other_last);
        assert_eq!(store, other);
    }

    #[test]
    fn test_eviction_is_by_calendar_day() {
        let mut store = BaselineStore::new(7);
        store.observe("dev", BaselineSignal::Hrv, day(0), Some(40.0));
        store.observe("dev", BaselineSignal::Hrv, day(3), Some(50.0));
        // A gap larger than the window drops everything before it
        let after_gap = store
            .observe("dev", BaselineSignal::Hrv, day(20), Some(60.0))
            .unwrap();
        assert_eq!(after_gap.sample_days, 1);
        assert_eq!(after_gap.deviation_pct, None);
    }

    #[test]
    fn test_same_day_replaces_sample() {
        let mut store = BaselineStore::new(14);
        store.observe("dev", BaselineSignal::Hrv, day(0), Some(60.0));
        store.observe("dev", BaselineSignal::Hrv, day(1), Some(62.0));
        let again = store
            .observe("dev", BaselineSignal::Hrv, day(1), Some(64.0))
            .unwrap();

        assert_eq!(again.sample_days, 2);
        assert!((again.mean - 62.0).abs() < 1e-12);
        // Deviation is still scored against day 0 only
        assert!((again.deviation_pct.unwrap() - (64.0 - 60.0) / 60.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_sample_ignored() {
        let mut store = BaselineStore::new(3);
        feed(&mut store, &[60.0, 70.0, 80.0, 90.0]);
        let before = store.clone();
        let result = store
            .observe("dev", BaselineSignal::Hrv, day(0), Some(500.0))
            .unwrap();

        assert_eq!(store, before);
        assert_eq!(result.deviation_pct, None);
        assert_eq!(result.sample_days, 3);
    }

    #[test]
    fn test_late_sample_inside_window_is_inserted_in_order() {
        let mut store = BaselineStore::new(5);
        store.observe("dev", BaselineSignal::Hrv, day(0), Some(60.0));
        store.observe("dev", BaselineSignal::Hrv, day(2), Some(64.0));
        store.observe("dev", BaselineSignal::Hrv, day(1), Some(62.0));

        let dates: Vec<NaiveDate> = store
            .window("dev", BaselineSignal::Hrv)
            .unwrap()
            .samples()
            .map(|s| s.date)
            .collect();
        assert_eq!(dates, vec![day(0), day(1), day(2)]);
    }

    #[test]
    fn test_missing_value_reports_existing_baseline() {
        let mut store = BaselineStore::new(7);
        assert!(store
            .observe("dev", BaselineSignal::Hrv, day(0), None)
            .is_none());
        assert!(store.is_empty());

        store.observe("dev", BaselineSignal::Hrv, day(0), Some(60.0));
        let carried = store
            .observe("dev", BaselineSignal::Hrv, day(1), Some(f64::NAN))
            .unwrap();
        assert_eq!(carried.sample_days, 1);
        assert_eq!(carried.deviation_pct, None);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut store = BaselineStore::new(7);
        store.observe("watch-a", BaselineSignal::Hrv, day(0), Some(60.0));
        store.observe("watch-b", BaselineSignal::Hrv, day(0), Some(90.0));
        store.observe("watch-a", BaselineSignal::RestingHr, day(0), Some(50.0));

        assert_eq!(store.len(), 3);
        let a = store.window("watch-a", BaselineSignal::Hrv).unwrap().stats().unwrap();
        assert_eq!(a.mean, 60.0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = BaselineStore::new(5);
        feed(&mut store, &[61.3, 70.1, 58.25, 66.6, 72.9, 64.4]);
        store.observe("other", BaselineSignal::SleepEfficiency, day(2), Some(0.913));

        let json = store.to_json().unwrap();
        let restored = BaselineStore::from_json(&json).unwrap();
        assert_eq!(restored, store);
        assert_eq!(restored.to_json().unwrap(), json);
    }

    #[test]
    fn test_snapshot_is_self_describing() {
        let mut store = BaselineStore::new(3);
        store.observe("dev", BaselineSignal::Hrv, day(0), Some(60.0));
        let value: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();

        assert_eq!(value["format"], SNAPSHOT_FORMAT);
        assert_eq!(value["version"], SNAPSHOT_VERSION);
        assert_eq!(value["window_days"], 3);
        assert_eq!(value["entries"][0]["signal"], "hrv");
        assert_eq!(value["entries"][0]["samples"][0]["date"], "2024-01-01");
    }

    #[test]
    fn test_snapshot_rejections() {
        let good = r#"{"format":"flux.baselines","version":1,"window_days":3,"entries":[
            {"device_id":"dev","signal":"hrv","samples":[{"date":"2024-01-01","value":60.0}]}]}"#;
        assert!(BaselineStore::from_json(good).is_ok());

        let cases = [
            "not json",
            r#"{"format":"other","version":1,"window_days":3,"entries":[]}"#,
            r#"{"format":"flux.baselines","version":9,"window_days":3,"entries":[]}"#,
            r#"{"format":"flux.baselines","version":1,"window_days":0,"entries":[]}"#,
            r#"{"format":"flux.baselines","version":1,"window_days":3,"entries":[
                {"device_id":"dev","signal":"hrv","samples":[]}]}"#,
            r#"{"format":"flux.baselines","version":1,"window_days":3,"entries":[
                {"device_id":"dev","signal":"hrv","samples":[
                    {"date":"2024-01-02","value":1.0},{"date":"2024-01-01","value":2.0}]}]}"#,
            r#"{"format":"flux.baselines","version":1,"window_days":3,"entries":[
                {"device_id":"dev","signal":"hrv","samples":[
                    {"date":"2024-01-01","value":1.0},{"date":"2024-01-09","value":2.0}]}]}"#,
            r#"{"format":"flux.baselines","version":1,"window_days":3,"entries":[
                {"device_id":"dev","signal":"hrv","samples":[{"date":"2024-01-01","value":1.0}]},
                {"device_id":"dev","signal":"hrv",
                 "samples":[{"date":"2024-01-01","value":1.0}]}]}"#,
            r#"{"format":"flux.baselines","version":1,"window_days":3,"entries":[
                {"device_id":"dev","signal":"pulse",
                 "samples":[{"date":"2024-01-01","value":1.0}]}]}"#,
        ];
        for case in cases {
            let err = BaselineStore::from_json(case).unwrap_err();
            assert!(
                matches!(err, ComputeError::BaselineFormat(_)),
                "expected format error for {case}"
            );
        }
    }

    #[test]
    fn test_ephemeral_scope() {
        let store = BaselineStore::ephemeral(0);
        assert_eq!(store.scope(), BaselineScope::Payload);
        assert_eq!(store.window_days(), 1);
        assert_eq!(BaselineStore::default().window_days(), DEFAULT_BASELINE_WINDOW);
    }
}
