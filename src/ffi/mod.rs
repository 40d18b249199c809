/**
 * ffi/mod.rs
 *
 * C ABI for host applications (Android/iOS shells)
 *
 * Only the synchronous address operations are exported; calls themselves
 * are driven from Rust. Strings returned by the library must be released
 * with meshcall_free_string. On failure a function returns null and the
 * reason is available from meshcall_last_error on the same thread.
 */

mod addresses;

pub use addresses::*;

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Initialize the library (call once at startup)
#[no_mangle]
pub extern "C" fn meshcall_init() -> i32 {
    // Log panics; `guard` keeps them from unwinding out of the exports
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("meshcall panic: {:?}", panic_info);
    }));
    0
}

/// Get library version string
#[no_mangle]
pub extern "C" fn meshcall_version() -> *mut c_char {
    rust_to_c_str(env!("CARGO_PKG_VERSION"))
}

/// Free a string allocated by the library
#[no_mangle]
pub extern "C" fn meshcall_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

/// Last error on this thread, or null. Free with meshcall_free_string.
#[no_mangle]
pub extern "C" fn meshcall_last_error() -> *mut c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_deref() {
        Some(err) => rust_to_c_str(err),
        None => std::ptr::null_mut(),
    })
}

#[no_mangle]
pub extern "C" fn meshcall_clear_error() {
    LAST_ERROR.with(|slot| slot.borrow_mut().take());
}

/// Run an export body, turning a panic into null plus a last error
pub(crate) fn guard<F: FnOnce() -> *mut c_char>(f: F) -> *mut c_char {
    match panic::catch_unwind(panic::AssertUnwindSafe(f)) {
        Ok(ptr) => ptr,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            set_last_error(format!("Internal error: {}", reason));
            std::ptr::null_mut()
        }
    }
}

pub(crate) fn set_last_error(error: impl Into<String>) {
    let error = error.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(error));
}

/// Helper to convert C string to Rust string
pub(crate) fn c_str_to_rust(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string()) }
}

/// Hand a string to C. Interior NULs cannot cross the boundary and are dropped.
pub(crate) fn rust_to_c_str(s: &str) -> *mut c_char {
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    match CString::new(bytes) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}
