//! End-to-end checks of the C ABI: ownership, lifecycle and error reporting.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use flux_hsi::ffi::*;
use flux_hsi::ErrorKind;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

// Ledger and handle counts are process-wide
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn last_error() -> Option<String> {
    let ptr = flux_last_error();
    (!ptr.is_null()).then(|| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Copy out a returned string and release it
fn take(ptr: *mut c_char) -> String {
    assert!(!ptr.is_null(), "call failed: {:?}", last_error());
    let value = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
    unsafe { flux_free_string(ptr) };
    assert!(flux_last_error().is_null());
    value
}

fn recoveries(first_day: u32, hrv: &[f64]) -> CString {
    let recovery: Vec<Value> = hrv
        .iter()
        .enumerate()
        .map(|(i, hrv)| {
            json!({
                "created_at": format!("2024-05-{:02}T09:00:00Z", first_day + i as u32),
                "score": {
                    "hrv_rmssd_milli": hrv,
                    "resting_heart_rate": 48.0,
                    "recovery_score": 70.0
                }
            })
        })
        .collect();
    c(&json!({ "recovery": recovery }).to_string())
}

struct Processor(*mut FluxProcessorHandle);

impl Processor {
    fn new(window_days: i32) -> Self {
        let handle = flux_processor_new(window_days);
        assert!(!handle.is_null());
        Self(handle)
    }

    fn whoop(&self, payload: &CString, device_id: &str) -> *mut c_char {
        let tz = c("UTC");
        let device = c(device_id);
        unsafe {
            flux_processor_process_whoop(self.0, payload.as_ptr(), tz.as_ptr(), device.as_ptr())
        }
    }

    fn save(&self) -> String {
        take(unsafe { flux_processor_save_baselines(self.0) })
    }

    fn load(&self, snapshot: &str) -> i32 {
        let snapshot = c(snapshot);
        unsafe { flux_processor_load_baselines(self.0, snapshot.as_ptr()) }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        unsafe { flux_processor_free(self.0) };
    }
}

fn days(json: &str) -> Vec<Value> {
    serde_json::from_str::<Value>(json).unwrap().as_array().unwrap().clone()
}

fn hrv_baseline(day: &Value) -> Value {
    day["windows"][0]["baseline"]["signals"]["hrv"].clone()
}

#[test]
fn window_days_are_normalized() {
    let _guard = serial();
    for (requested, expected) in [(0, 14), (-7, 14), (1, 1), (30, 30)] {
        let processor = Processor::new(requested);
        assert_eq!(unsafe { flux_processor_baseline_window(processor.0) }, expected);
        assert!(flux_last_error().is_null());
    }
}

#[test]
fn create_release_and_strings_balance() {
    let _guard = serial();
    let handles_before = live_handle_count();
    let strings_before = live_string_count();

    {
        let processor = Processor::new(7);
        assert_eq!(live_handle_count(), handles_before + 1);

        let out = processor.whoop(&recoveries(1, &[55.0, 57.0]), "balance-1");
        assert!(is_live_string(out));
        assert_eq!(live_string_count(), strings_before + 1);
        take(out);
        processor.save();
    }

    assert_eq!(live_handle_count(), handles_before);
    assert_eq!(live_string_count(), strings_before);
}

#[test]
fn release_null_is_a_noop() {
    let _guard = serial();
    for _ in 0..3 {
        unsafe { flux_processor_free(ptr::null_mut()) };
        assert!(flux_last_error().is_null());
        unsafe { flux_free_string(ptr::null_mut()) };
        assert!(flux_last_error().is_null());
    }
}

#[test]
fn success_clears_previous_error() {
    let _guard = serial();
    let tz = c("Atlantis/Capital");
    let device = c("clear-1");
    let payload = recoveries(1, &[60.0]);

    let failed = unsafe { flux_whoop_to_hsi_daily(payload.as_ptr(), tz.as_ptr(), device.as_ptr()) };
    assert!(failed.is_null());
    assert_eq!(flux_last_error_kind(), ErrorKind::Validation.code());
    assert!(last_error().unwrap().contains("Atlantis/Capital"));

    let tz = c("UTC");
    let ok = unsafe { flux_whoop_to_hsi_daily(payload.as_ptr(), tz.as_ptr(), device.as_ptr()) };
    assert!(flux_last_error().is_null());
    assert_eq!(flux_last_error_kind(), 0);
    take(ok);
}

#[test]
fn empty_device_id_is_rejected() {
    let _guard = serial();
    let processor = Processor::new(14);
    let out = processor.whoop(&recoveries(1, &[60.0]), "  ");
    assert!(out.is_null());
    assert_eq!(flux_last_error_kind(), ErrorKind::Validation.code());
}

#[test]
fn released_handle_reports_state_error() {
    let _guard = serial();
    let handle = flux_processor_new(14);
    unsafe { flux_processor_free(handle) };
    assert!(flux_last_error().is_null());

    let payload = recoveries(1, &[60.0]);
    let tz = c("UTC");
    let device = c("released-1");
    let out = unsafe {
        flux_processor_process_whoop(handle, payload.as_ptr(), tz.as_ptr(), device.as_ptr())
    };
    assert!(out.is_null());
    assert_eq!(flux_last_error_kind(), ErrorKind::State.code());

    assert_eq!(unsafe { flux_processor_baseline_window(handle) }, -1);
    assert!(unsafe { flux_processor_save_baselines(handle) }.is_null());
    assert_eq!(flux_last_error_kind(), ErrorKind::State.code());

    // Double release is detected, not fatal
    unsafe { flux_processor_free(handle) };
    assert_eq!(flux_last_error_kind(), ErrorKind::State.code());
}

#[test]
fn double_string_release_is_detected() {
    let _guard = serial();
    let processor = Processor::new(14);
    let out = processor.whoop(&recoveries(1, &[60.0]), "double-free");
    take(out);

    unsafe { flux_free_string(out) };
    assert_eq!(flux_last_error_kind(), ErrorKind::State.code());

    let library_owned = flux_version() as *mut c_char;
    unsafe { flux_free_string(library_owned) };
    assert_eq!(flux_last_error_kind(), ErrorKind::State.code());
}

#[test]
fn fourteen_day_scenario_matches_hand_computation() {
    let _guard = serial();
    let processor = Processor::new(14);
    let hrv: Vec<f64> = (51..=64).map(f64::from).collect();
    let out = days(&take(processor.whoop(&recoveries(1, &hrv), "scenario-14")));
    assert_eq!(out.len(), 14);

    let last = hrv_baseline(&out[13]);
    assert_eq!(last["sample_days"], 14);
    assert_eq!(last["mean"], 57.5);
    assert!((last["variance"].as_f64().unwrap() - 17.5).abs() < 1e-9);
    assert!((last["std_dev"].as_f64().unwrap() - 17.5f64.sqrt()).abs() < 1e-9);

    // Day 15 evicts day 1 (51): window is 52..=65
    let next = days(&take(processor.whoop(&recoveries(15, &[65.0]), "scenario-14")));
    let shifted = hrv_baseline(&next[0]);
    assert_eq!(shifted["sample_days"], 14);
    assert_eq!(shifted["mean"], 58.5);
    assert_eq!(shifted["window_start"], "2024-05-02");
}

#[test]
fn load_of_save_is_observably_identical() {
    let _guard = serial();
    let original = Processor::new(5);
    take(original.whoop(&recoveries(1, &[61.3, 58.9, 64.2]), "roundtrip-1"));
    let snapshot = original.save();

    let restored = Processor::new(30);
    assert_eq!(restored.load(&snapshot), 0);
    assert!(flux_last_error().is_null());
    assert_eq!(unsafe { flux_processor_baseline_window(restored.0) }, 5);
    assert_eq!(restored.save(), snapshot);

    let next = recoveries(4, &[66.6]);
    let a = days(&take(original.whoop(&next, "roundtrip-1")));
    let b = days(&take(restored.whoop(&next, "roundtrip-1")));
    assert_eq!(
        a[0]["windows"][0]["baseline"],
        b[0]["windows"][0]["baseline"]
    );
}

#[test]
fn failed_calls_leave_state_unchanged() {
    let _guard = serial();
    let processor = Processor::new(7);
    take(processor.whoop(&recoveries(1, &[60.0, 62.0]), "atomic-1"));
    let before = processor.save();

    let malformed = c(r#"{"recovery": [
        {"created_at": "2024-05-03T09:00:00Z", "score": {"hrv_rmssd_milli": 99.0}},
        {"created_at": 7}
    ]}"#);
    assert!(processor.whoop(&malformed, "atomic-1").is_null());
    assert_eq!(flux_last_error_kind(), ErrorKind::Format.code());
    assert_eq!(processor.save(), before);

    let zero_window = r#"{"format":"flux.baselines","version":1,"window_days":0,"entries":[]}"#;
    assert_eq!(processor.load(zero_window), -1);
    assert_eq!(flux_last_error_kind(), ErrorKind::Format.code());
    assert_eq!(processor.load("not json"), -1);
    assert_eq!(processor.save(), before);

    let null_load = unsafe { flux_processor_load_baselines(processor.0, ptr::null()) };
    assert_eq!(null_load, -1);
    assert_eq!(flux_last_error_kind(), ErrorKind::Validation.code());
}

#[test]
fn garmin_stateful_conversion() {
    let _guard = serial();
    let processor = Processor::new(14);
    let payload = c(r#"{"dailies": [
        {"calendarDate": "2024-05-01", "restingHeartRate": 50, "restingHeartRateHrv": 70.0},
        {"calendarDate": "2024-05-02", "restingHeartRate": 52, "restingHeartRateHrv": 60.0}
    ]}"#);
    let tz = c("Europe/London");
    let device = c("garmin-1");
    let out = take(unsafe {
        flux_processor_process_garmin(processor.0, payload.as_ptr(), tz.as_ptr(), device.as_ptr())
    });

    let out = days(&out);
    assert_eq!(out.len(), 2);
    let rhr = &out[1]["windows"][0]["baseline"]["signals"]["resting_hr"];
    assert_eq!(rhr["mean"], 51.0);
    assert_eq!(out[1]["windows"][0]["baseline"]["scope"], "persistent");
    let hrv_deviation = out[1]["windows"][0]["baseline"]["hrv_deviation_pct"]
        .as_f64()
        .unwrap();
    assert!((hrv_deviation + 100.0 / 7.0).abs() < 1e-9);
}

#[test]
fn version_matches_crate() {
    let version = unsafe { CStr::from_ptr(flux_version()) };
    assert_eq!(version.to_str().unwrap(), flux_hsi::FLUX_VERSION);
}
