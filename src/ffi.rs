// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! FFI (Foreign Function Interface) layer for managed runtimes
//!
//! This module provides C-compatible functions that a managed runtime (JNA,
//! CGO, ctypes, P/Invoke) calls to load the native suite and run its
//! companion executables.
//!
//! # Safety
//!
//! All functions use `extern "C"` and are marked with `#[no_mangle]` to ensure
//! stable ABI. Panics are caught and converted to error codes.
//!
//! # Errors
//!
//! Failing calls return NULL or -1 and store a message retrievable with
//! `avc_last_error` on the calling thread.
//!
//! # Memory Management
//!
//! - The caller owns input strings
//! - Rust owns the native handle (opaque pointer)
//! - Caller must call `avc_native_free` to release the handle
//! - Strings returned by `avc_last_error` are freed with `avc_free_string`

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fmt::Display;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use tracing::error;

use crate::config::AvcConfig;
use crate::context::AvcContext;
use crate::native::NativeAvc;

/// Opaque handle to the loaded native suite
/// This is passed between the managed runtime and Rust as a void pointer
struct NativeHandle {
    runtime: tokio::runtime::Runtime,
    native: Arc<NativeAvc>,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: impl Display) {
    let message = message.to_string();
    error!("{}", message);
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Borrow a caller string; NULL and invalid UTF-8 are errors
fn arg_str<'a>(value: *const c_char, name: &str) -> Option<&'a str> {
    if value.is_null() {
        set_last_error(format!("'{name}' must not be NULL"));
        return None;
    }
    // SAFETY: caller guarantees a NUL-terminated string that outlives the call
    match unsafe { CStr::from_ptr(value) }.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error(format!("'{name}' is not valid UTF-8"));
            None
        }
    }
}

/// Load the native suite
///
/// # Arguments
///
/// * `resource_dir` - Directory with packaged native archives, or NULL to use
///   `AVC_RESOURCE_DIR` / the default
///
/// # Returns
///
/// * Opaque handle, or NULL on error
///
/// # Safety
///
/// The returned handle must be freed with `avc_native_free`.
#[no_mangle]
pub extern "C" fn avc_native_init(resource_dir: *const c_char) -> *mut c_void {
    clear_last_error();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut config = AvcConfig::from_env();
        if !resource_dir.is_null() {
            config.resource_dir = arg_str(resource_dir, "resource_dir")?.into();
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                set_last_error(format!("failed to build runtime: {e}"));
                return None;
            }
        };

        let context = AvcContext::new(config);
        match runtime.block_on(context.native()) {
            Ok(native) => Some(Box::new(NativeHandle { runtime, native })),
            Err(e) => {
                set_last_error(e);
                None
            }
        }
    }));

    match result {
        Ok(Some(handle)) => Box::into_raw(handle) as *mut c_void,
        Ok(None) => ptr::null_mut(),
        Err(_) => {
            set_last_error("panic while loading native suite");
            ptr::null_mut()
        }
    }
}

/// Run a companion executable from the native directory
///
/// # Arguments
///
/// * `handle` - Handle from `avc_native_init`
/// * `binary` - Executable name (`ffmpeg`, `ffprobe`, `ffserver`)
/// * `args` - Command-line string, passed through the platform shell
/// * `output_error` - Non-zero to also drain and log stderr
///
/// # Returns
///
/// * Exit code of the process, or -1 on error
///
/// # Safety
///
/// - `handle` must be valid (from `avc_native_init`)
/// - `binary` and `args` must be NUL-terminated strings; `args` may be NULL
#[no_mangle]
pub extern "C" fn avc_native_execute(
    handle: *mut c_void,
    binary: *const c_char,
    args: *const c_char,
    output_error: c_int,
) -> c_int {
    clear_last_error();
    if handle.is_null() {
        set_last_error("'handle' must not be NULL");
        return -1;
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: Caller guarantees handle is valid
        let handle = unsafe { &*(handle as *const NativeHandle) };

        let binary = arg_str(binary, "binary")?;
        let args = if args.is_null() {
            ""
        } else {
            arg_str(args, "args")?
        };

        let output = handle.runtime.block_on(handle.native.execute_named(
            binary,
            args,
            output_error != 0,
        ));

        match output {
            Ok(output) => match output.exit_code {
                Some(code) => Some(code),
                None => {
                    set_last_error(format!("{binary} was terminated by a signal"));
                    None
                }
            },
            Err(e) => {
                set_last_error(e);
                None
            }
        }
    }));

    match result {
        Ok(Some(code)) => code,
        Ok(None) => -1,
        Err(_) => {
            set_last_error("panic while running process");
            -1
        }
    }
}

/// Packed version (`major << 16 | minor << 8 | micro`) of a bound library
///
/// # Returns
///
/// * Version, or 0 if `name` is not one of the FFmpeg libraries
///
/// # Safety
///
/// - `handle` must be valid (from `avc_native_init`)
/// - `name` must be a NUL-terminated string
#[no_mangle]
pub extern "C" fn avc_native_library_version(handle: *mut c_void, name: *const c_char) -> c_uint {
    clear_last_error();
    if handle.is_null() {
        set_last_error("'handle' must not be NULL");
        return 0;
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: Caller guarantees handle is valid
        let handle = unsafe { &*(handle as *const NativeHandle) };
        let name = arg_str(name, "name")?;

        match handle.native.libs().get(name) {
            Some(library) => Some(library.version().packed()),
            None => {
                set_last_error(format!("unknown library '{name}'"));
                None
            }
        }
    }));

    match result {
        Ok(Some(version)) => version,
        _ => 0,
    }
}

/// Free the native handle and release resources
///
/// Libraries stay mapped for as long as another Rust owner holds the suite.
///
/// # Safety
///
/// - `handle` must be valid (from `avc_native_init`)
/// - `handle` must not be used after this call
/// - This function is idempotent for NULL
#[no_mangle]
pub extern "C" fn avc_native_free(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }

    let _ = catch_unwind(|| {
        // SAFETY: Caller guarantees handle is valid
        unsafe {
            let _ = Box::from_raw(handle as *mut NativeHandle);
            // Box is dropped here, shutting down the runtime
        }
    });
}

/// Get version string
///
/// # Returns
///
/// * Pointer to null-terminated version string (static lifetime)
///
/// # Safety
///
/// Returned pointer is valid for the entire program lifetime.
/// Caller must NOT free this pointer.
#[no_mangle]
pub extern "C" fn avc_native_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

/// Get last error message of the calling thread
///
/// # Returns
///
/// * Pointer to null-terminated error string, or NULL if no error
///
/// # Safety
///
/// Caller must free the returned string with `avc_free_string`.
#[no_mangle]
pub extern "C" fn avc_last_error() -> *mut c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some(message) => message.clone().into_raw(),
        None => ptr::null_mut(),
    })
}

/// Free a string allocated by Rust
///
/// # Arguments
///
/// * `s` - Pointer to string from Rust functions
///
/// # Safety
///
/// - `s` must have been allocated by a Rust FFI function
/// - `s` must not be used after this call
#[no_mangle]
pub extern "C" fn avc_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }

    let _ = catch_unwind(|| unsafe {
        let _ = CString::from_raw(s);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last_error() -> Option<String> {
        let ptr = avc_last_error();
        if ptr.is_null() {
            return None;
        }
        let message = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        avc_free_string(ptr);
        Some(message)
    }

    #[test]
    fn test_version() {
        let version_ptr = avc_native_version();
        assert!(!version_ptr.is_null());

        let version = unsafe { CStr::from_ptr(version_ptr) };
        let version_str = version.to_str().unwrap();
        assert!(!version_str.is_empty());
    }

    #[test]
    fn test_init_without_resources() {
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().to_str().unwrap()).unwrap();

        let handle = avc_native_init(path.as_ptr());
        assert!(handle.is_null());
        assert!(last_error().is_some());
    }

    #[test]
    fn test_null_handle() {
        // Should not crash with null handle
        avc_native_free(ptr::null_mut());

        let binary = CString::new("ffmpeg").unwrap();
        let result = avc_native_execute(ptr::null_mut(), binary.as_ptr(), ptr::null(), 1);
        assert_eq!(result, -1);
        assert_eq!(last_error().unwrap(), "'handle' must not be NULL");

        let name = CString::new("avutil").unwrap();
        assert_eq!(avc_native_library_version(ptr::null_mut(), name.as_ptr()), 0);
    }

    #[test]
    fn test_last_error_cleared() {
        set_last_error("boom");
        assert_eq!(last_error().unwrap(), "boom");

        clear_last_error();
        assert!(last_error().is_none());
    }
}
