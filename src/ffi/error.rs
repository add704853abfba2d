//! Thread-local last-error slot

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

use crate::error::{ComputeError, ErrorKind};

struct LastError {
    kind: ErrorKind,
    message: CString,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Record `err` as this thread's last error
pub(crate) fn set_last_error(err: &ComputeError) {
    // Interior NULs would truncate the message on the C side
    let message = err.to_string().replace('\0', "\u{FFFD}");
    let message = CString::new(message).unwrap_or_default();
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(LastError {
            kind: err.kind(),
            message,
        });
    });
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

/// Message of the last error; valid until the next call on this thread
pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| match &*slot.borrow() {
        Some(last) => last.message.as_ptr(),
        None => ptr::null(),
    })
}

/// Kind code of the last error, 0 when there is none
pub(crate) fn last_error_code() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |last| last.kind.code()))
}

/// Report a result's error through the slot, passing the value through
pub(crate) fn report<T>(result: Result<T, ComputeError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            set_last_error(&err);
            None
        }
    }
}
