//! Ownership of strings handed across the C boundary
//!
//! Every caller-owned string is registered in a ledger of live allocations.
//! A release is honored only for pointers in the ledger, so double frees and
//! attempts to free library-owned or foreign memory become reported errors.

use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Mutex, PoisonError};

use crate::error::ComputeError;

static LIVE_STRINGS: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());

fn ledger() -> std::sync::MutexGuard<'static, BTreeSet<usize>> {
    LIVE_STRINGS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand `value` to the caller as a NUL-terminated buffer
pub(crate) fn into_owned_ptr(value: String) -> Result<*mut c_char, ComputeError> {
    let cstring = CString::new(value)
        .map_err(|e| ComputeError::EncodingError(format!("output contains NUL: {e}")))?;
    let ptr = cstring.into_raw();
    ledger().insert(ptr as usize);
    Ok(ptr)
}

/// Free a buffer previously returned by [`into_owned_ptr`].
///
/// # Safety
/// `ptr` must be null or a pointer obtained from this module. Anything else
/// is rejected without being touched.
pub(crate) unsafe fn release(ptr: *mut c_char) -> Result<(), ComputeError> {
    if ptr.is_null() {
        return Ok(());
    }
    if !ledger().remove(&(ptr as usize)) {
        return Err(ComputeError::InvalidRelease(format!(
            "{ptr:p} is not a live string owned by the caller"
        )));
    }
    drop(CString::from_raw(ptr));
    Ok(())
}

/// Borrow a caller string argument as UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated buffer that outlives `'a`.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, ComputeError> {
    if ptr.is_null() {
        return Err(ComputeError::InvalidArgument(format!("{name} is null")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| ComputeError::InvalidArgument(format!("{name} is not UTF-8: {e}")))
}

/// Caller-owned strings not yet released
pub fn live_string_count() -> usize {
    ledger().len()
}

pub fn is_live_string(ptr: *const c_char) -> bool {
    !ptr.is_null() && ledger().contains(&(ptr as usize))
}
