//! Pipeline orchestration
//!
//! This module provides the public Rust API. It runs raw vendor JSON through
//! adapter, normalizer, feature derivation, baselines and encoding, and
//! returns one JSON array with an HSI payload per day.

use chrono_tz::Tz;

use crate::adapters::adapter_for;
use crate::baseline::BaselineStore;
use crate::config::{normalize_window_days, ProcessorConfig, DEFAULT_BASELINE_WINDOW};
use crate::encoder::HsiEncoder;
use crate::error::ComputeError;
use crate::features::FeatureDeriver;
use crate::normalizer::Normalizer;
use crate::types::Vendor;

/// Check request arguments before any payload work
pub fn validate_request(timezone: &str, device_id: &str) -> Result<Tz, ComputeError> {
    if device_id.trim().is_empty() {
        return Err(ComputeError::InvalidDeviceId(
            "device id must not be empty".to_string(),
        ));
    }
    timezone
        .trim()
        .parse::<Tz>()
        .map_err(|_| ComputeError::InvalidTimezone(timezone.to_string()))
}

/// Convert raw WHOOP JSON to a JSON array of HSI daily payloads.
///
/// Baselines only see the days in this payload.
///
/// # Example
/// ```ignore
/// let hsi = whoop_to_hsi_daily(whoop_json, "America/New_York", "device-123")?;
/// ```
pub fn whoop_to_hsi_daily(
    raw_json: &str,
    timezone: &str,
    device_id: &str,
) -> Result<String, ComputeError> {
    FluxProcessor::stateless().process(Vendor::Whoop, raw_json, timezone, device_id)
}

/// Convert raw Garmin JSON to a JSON array of HSI daily payloads.
///
/// Baselines only see the days in this payload.
pub fn garmin_to_hsi_daily(
    raw_json: &str,
    timezone: &str,
    device_id: &str,
) -> Result<String, ComputeError> {
    FluxProcessor::stateless().process(Vendor::Garmin, raw_json, timezone, device_id)
}

/// Stateful processor for incremental processing with persistent baselines.
///
/// Use this when you need to maintain baselines across multiple API calls.
/// A failed call leaves the baselines exactly as they were.
#[derive(Debug, Clone)]
pub struct FluxProcessor {
    baseline_store: BaselineStore,
    encoder: HsiEncoder,
}

impl Default for FluxProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FluxProcessor {
    /// Create a new processor with the default 14-day window
    pub fn new() -> Self {
        Self::with_baseline_window(i64::from(DEFAULT_BASELINE_WINDOW))
    }

    /// Create a processor with a specific baseline window size.
    ///
    /// Non-positive sizes fall back to the default.
    pub fn with_baseline_window(window_days: i64) -> Self {
        Self {
            baseline_store: BaselineStore::new(normalize_window_days(window_days)),
            encoder: HsiEncoder::new(),
        }
    }

    pub fn from_config(config: &ProcessorConfig) -> Self {
        let encoder = match &config.instance_id {
            Some(id) => HsiEncoder::with_instance_id(id.clone()),
            None => HsiEncoder::new(),
        };
        Self {
            baseline_store: BaselineStore::new(config.window_days()),
            encoder,
        }
    }

    fn stateless() -> Self {
        Self {
            baseline_store: BaselineStore::ephemeral(DEFAULT_BASELINE_WINDOW),
            encoder: HsiEncoder::new(),
        }
    }

    pub fn baseline_window_days(&self) -> u32 {
        self.baseline_store.window_days()
    }

    pub fn baselines(&self) -> &BaselineStore {
        &self.baseline_store
    }

    pub fn instance_id(&self) -> &str {
        self.encoder.instance_id()
    }

    /// Load baseline state from a snapshot.
    ///
    /// The snapshot's window length replaces the current one. On error the
    /// current baselines are kept.
    pub fn load_baselines(&mut self, json: &str) -> Result<(), ComputeError> {
        let store = BaselineStore::from_json(json).inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected baseline snapshot");
        })?;
        tracing::info!(
            keys = store.len(),
            window_days = store.window_days(),
            "Loaded baselines"
        );
        self.baseline_store = store;
        Ok(())
    }

    /// Save baseline state to a snapshot
    pub fn save_baselines(&self) -> Result<String, ComputeError> {
        self.baseline_store.to_json()
    }

    /// Process WHOOP payload with persistent baselines
    pub fn process_whoop(
        &mut self,
        raw_json: &str,
        timezone: &str,
        device_id: &str,
    ) -> Result<String, ComputeError> {
        self.process(Vendor::Whoop, raw_json, timezone, device_id)
    }

    /// Process Garmin payload with persistent baselines
    pub fn process_garmin(
        &mut self,
        raw_json: &str,
        timezone: &str,
        device_id: &str,
    ) -> Result<String, ComputeError> {
        self.process(Vendor::Garmin, raw_json, timezone, device_id)
    }

    /// Run a payload through the pipeline.
    ///
    /// Stages:
    /// 1. VendorPayloadAdapter - Parse and map to canonical signals
    /// 2. Normalizer - Normalize units and scales
    /// 3. FeatureDeriver - Compute derived features
    /// 4. BaselineStore - Apply baseline context
    /// 5. HsiEncoder - Encode to HSI JSON
    pub fn process(
        &mut self,
        vendor: Vendor,
        raw_json: &str,
        timezone: &str,
        device_id: &str,
    ) -> Result<String, ComputeError> {
        let tz = validate_request(timezone, device_id)?;
        let device_id = device_id.trim();
        let canonical_signals = adapter_for(vendor).parse(raw_json, tz, device_id)?;

        // Stage on a copy so a failure leaves the baselines untouched
        let mut staged = self.baseline_store.clone();
        let contextual: Vec<_> = canonical_signals
            .iter()
            .map(|canonical| {
                let normalized = Normalizer::normalize(canonical);
                let derived = FeatureDeriver::derive(normalized);
                staged.update_and_contextualize(derived)
            })
            .collect();

        let json = self.encoder.encode_days(&contextual)?;
        self.baseline_store = staged;

        tracing::debug!(
            vendor = vendor.as_str(),
            device_id,
            days = contextual.len(),
            "Converted payload"
        );
        Ok(json)
    }
}
