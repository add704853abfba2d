//! FFI bindings for Flux
//!
//! C-compatible functions for calling Flux from other languages. All string
//! arguments are NUL-terminated UTF-8. Strings returned by conversion and
//! save functions belong to the caller and must be released with
//! `flux_free_string`; strings from `flux_last_error` and `flux_version`
//! belong to the library.
//!
//! Every fallible function clears the calling thread's error slot on entry and
//! fills it on failure, signaled by a NULL or `-1` return.

mod error;
mod handle;
mod memory;

pub use handle::{live_handle_count, FluxProcessorHandle};
pub use memory::{is_live_string, live_string_count};

use std::os::raw::c_char;
use std::ptr;

use crate::error::ComputeError;
use crate::pipeline::{garmin_to_hsi_daily, whoop_to_hsi_daily, FluxProcessor};
use crate::types::Vendor;
use error::{clear_last_error, report, set_last_error};
use memory::read_str;

/// Hand a result string to the caller, or report the error and return NULL
fn return_string(result: Result<String, ComputeError>) -> *mut c_char {
    report(result.and_then(memory::into_owned_ptr)).unwrap_or(ptr::null_mut())
}

struct Request<'a> {
    json: &'a str,
    timezone: &'a str,
    device_id: &'a str,
}

unsafe fn read_request<'a>(
    json: *const c_char,
    timezone: *const c_char,
    device_id: *const c_char,
) -> Result<Request<'a>, ComputeError> {
    Ok(Request {
        json: read_str(json, "json")?,
        timezone: read_str(timezone, "timezone")?,
        device_id: read_str(device_id, "device_id")?,
    })
}

unsafe fn convert_stateless(
    vendor: Vendor,
    json: *const c_char,
    timezone: *const c_char,
    device_id: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let result = read_request(json, timezone, device_id).and_then(|req| {
        let convert = match vendor {
            Vendor::Whoop => whoop_to_hsi_daily,
            Vendor::Garmin => garmin_to_hsi_daily,
        };
        convert(req.json, req.timezone, req.device_id)
    });
    return_string(result)
}

unsafe fn convert_stateful(
    processor: *mut FluxProcessorHandle,
    vendor: Vendor,
    json: *const c_char,
    timezone: *const c_char,
    device_id: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let result = read_request(json, timezone, device_id).and_then(|req| {
        handle::with_processor(processor, |p| {
            p.process(vendor, req.json, req.timezone, req.device_id)
        })
    });
    return_string(result)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Process WHOOP JSON and return an HSI JSON array.
///
/// # Safety
/// - `json`, `timezone`, and `device_id` must be NULL or valid NUL-terminated C strings.
/// - Returns a newly allocated string that must be freed with `flux_free_string`.
/// - Returns NULL on error; call `flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn flux_whoop_to_hsi_daily(
    json: *const c_char,
    timezone: *const c_char,
    device_id: *const c_char,
) -> *mut c_char {
    convert_stateless(Vendor::Whoop, json, timezone, device_id)
}

/// Process Garmin JSON and return an HSI JSON array.
///
/// # Safety
/// Same contract as `flux_whoop_to_hsi_daily`.
#[no_mangle]
pub unsafe extern "C" fn flux_garmin_to_hsi_daily(
    json: *const c_char,
    timezone: *const c_char,
    device_id: *const c_char,
) -> *mut c_char {
    convert_stateless(Vendor::Garmin, json, timezone, device_id)
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Create a processor with the given baseline window; `<= 0` selects 14 days.
///
/// Must be released with `flux_processor_free`. Returns NULL on error.
#[no_mangle]
pub extern "C" fn flux_processor_new(baseline_window_days: i32) -> *mut FluxProcessorHandle {
    clear_last_error();
    let processor = FluxProcessor::with_baseline_window(i64::from(baseline_window_days));
    let window_days = processor.baseline_window_days();
    match report(handle::register(processor)) {
        Some(handle) => {
            tracing::info!(window_days, "Created processor");
            handle
        }
        None => ptr::null_mut(),
    }
}

/// Release a processor. NULL is ignored; a released or unknown handle is
/// reported through `flux_last_error` and otherwise ignored.
///
/// # Safety
/// `processor` must be NULL or a value returned by `flux_processor_new`.
#[no_mangle]
pub unsafe extern "C" fn flux_processor_free(processor: *mut FluxProcessorHandle) {
    clear_last_error();
    match handle::release(processor) {
        Ok(()) if !processor.is_null() => tracing::info!("Released processor"),
        Ok(()) => {}
        Err(err) => {
            tracing::warn!(error = %err, "Rejected processor release");
            set_last_error(&err);
        }
    }
}

/// Process WHOOP JSON with a stateful processor.
///
/// # Safety
/// - `processor` must be a value returned by `flux_processor_new`.
/// - `json`, `timezone`, and `device_id` must be NULL or valid NUL-terminated C strings.
/// - Returns a newly allocated string that must be freed with `flux_free_string`.
/// - Returns NULL on error; call `flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn flux_processor_process_whoop(
    processor: *mut FluxProcessorHandle,
    json: *const c_char,
    timezone: *const c_char,
    device_id: *const c_char,
) -> *mut c_char {
    convert_stateful(processor, Vendor::Whoop, json, timezone, device_id)
}

/// Process Garmin JSON with a stateful processor.
///
/// # Safety
/// Same contract as `flux_processor_process_whoop`.
#[no_mangle]
pub unsafe extern "C" fn flux_processor_process_garmin(
    processor: *mut FluxProcessorHandle,
    json: *const c_char,
    timezone: *const c_char,
    device_id: *const c_char,
) -> *mut c_char {
    convert_stateful(processor, Vendor::Garmin, json, timezone, device_id)
}

/// Save processor baselines to a JSON snapshot.
///
/// # Safety
/// - `processor` must be a value returned by `flux_processor_new`.
/// - Returns a newly allocated string that must be freed with `flux_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn flux_processor_save_baselines(
    processor: *mut FluxProcessorHandle,
) -> *mut c_char {
    clear_last_error();
    return_string(handle::with_processor(processor, |p| p.save_baselines()))
}

/// Replace processor baselines with a JSON snapshot.
///
/// Returns 0 on success, -1 on error. A rejected snapshot leaves the current
/// baselines in place.
///
/// # Safety
/// - `processor` must be a value returned by `flux_processor_new`.
/// - `json` must be NULL or a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn flux_processor_load_baselines(
    processor: *mut FluxProcessorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();
    let result = read_str(json, "json")
        .and_then(|json| handle::with_processor(processor, |p| p.load_baselines(json)));
    match report(result) {
        Some(()) => 0,
        None => -1,
    }
}

/// Baseline window of a processor in days, or -1 on error.
///
/// # Safety
/// `processor` must be a value returned by `flux_processor_new`.
#[no_mangle]
pub unsafe extern "C" fn flux_processor_baseline_window(
    processor: *mut FluxProcessorHandle,
) -> i32 {
    clear_last_error();
    let result = handle::with_processor(processor, |p| Ok(p.baseline_window_days()));
    report(result)
        .map(|days| i32::try_from(days).unwrap_or(i32::MAX))
        .unwrap_or(-1)
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Flux functions. NULL is ignored.
///
/// Pointers that are not live caller-owned strings (already freed, returned
/// by `flux_last_error`/`flux_version`, or foreign) are not freed; the
/// attempt is reported through `flux_last_error`.
///
/// # Safety
/// `ptr` must be NULL or a pointer value; it is only dereferenced when it is
/// a live string issued by this library.
#[no_mangle]
pub unsafe extern "C" fn flux_free_string(ptr: *mut c_char) {
    clear_last_error();
    if let Err(err) = memory::release(ptr) {
        tracing::warn!(error = %err, "Rejected string release");
        set_last_error(&err);
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message on this thread.
///
/// The pointer is valid until the next Flux call on this thread. Do NOT free
/// it. Returns NULL if the last call succeeded.
#[no_mangle]
pub extern "C" fn flux_last_error() -> *const c_char {
    error::last_error_ptr()
}

/// Kind of the last error on this thread: 0 none, 1 validation, 2 format,
/// 3 state, 4 allocation.
#[no_mangle]
pub extern "C" fn flux_last_error_kind() -> i32 {
    error::last_error_code()
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Flux library version. Returns a static string; do NOT free.
#[no_mangle]
pub extern "C" fn flux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::ffi::{CStr, CString};

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn take(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "call failed: {:?}", last_error());
        let value = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        unsafe { flux_free_string(ptr) };
        value
    }

    fn last_error() -> Option<String> {
        let ptr = flux_last_error();
        (!ptr.is_null()).then(|| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    const RECOVERY: &str = r#"{"recovery": [{"created_at": "2024-01-15T12:00:00Z",
        "score": {"hrv_rmssd_milli": 65.0, "resting_heart_rate": 52.0}}]}"#;

    #[test]
    fn test_stateless_whoop() {
        let json = c(RECOVERY);
        let tz = c("UTC");
        let device = c("ffi-stateless");
        let out = take(unsafe {
            flux_whoop_to_hsi_daily(json.as_ptr(), tz.as_ptr(), device.as_ptr())
        });

        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert!(flux_last_error().is_null());
        assert_eq!(flux_last_error_kind(), 0);
    }

    #[test]
    fn test_null_argument_is_validation_error() {
        let tz = c("UTC");
        let device = c("ffi-null");
        let out = unsafe { flux_garmin_to_hsi_daily(ptr::null(), tz.as_ptr(), device.as_ptr()) };
        assert!(out.is_null());
        assert_eq!(flux_last_error_kind(), ErrorKind::Validation.code());
        assert!(last_error().unwrap().contains("json is null"));
    }

    #[test]
    fn test_bad_payload_is_format_error() {
        let json = c("[1, 2");
        let tz = c("UTC");
        let device = c("ffi-format");
        let out = unsafe { flux_whoop_to_hsi_daily(json.as_ptr(), tz.as_ptr(), device.as_ptr()) };
        assert!(out.is_null());
        assert_eq!(flux_last_error_kind(), ErrorKind::Format.code());
    }

    #[test]
    fn test_processor_lifecycle() {
        let processor = flux_processor_new(0);
        assert!(!processor.is_null());
        assert_eq!(unsafe { flux_processor_baseline_window(processor) }, 14);

        let json = c(RECOVERY);
        let tz = c("UTC");
        let device = c("ffi-lifecycle");
        take(unsafe {
            flux_processor_process_whoop(processor, json.as_ptr(), tz.as_ptr(), device.as_ptr())
        });

        unsafe { flux_processor_free(processor) };
        assert!(flux_last_error().is_null());

        let out = unsafe {
            flux_processor_process_whoop(processor, json.as_ptr(), tz.as_ptr(), device.as_ptr())
        };
        assert!(out.is_null());
        assert_eq!(flux_last_error_kind(), ErrorKind::State.code());
    }

    #[test]
    fn test_version_is_static() {
        let version = unsafe { CStr::from_ptr(flux_version()) };
        assert_eq!(version.to_str().unwrap(), crate::FLUX_VERSION);

        unsafe { flux_free_string(flux_version() as *mut c_char) };
        assert_eq!(flux_last_error_kind(), ErrorKind::State.code());
        assert_eq!(version.to_str().unwrap(), crate::FLUX_VERSION);
    }
}
