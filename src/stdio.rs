// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! `stdio.h` subset of the platform C runtime
//!
//! FFmpeg writes diagnostics straight to the C runtime's `stderr`. Binding
//! `fopen`/`freopen`/`fflush`/`fclose` from the same runtime the native suite
//! links against lets callers reopen those streams onto files:
//!
//! ```rust,ignore
//! let stderr = stdio.std_stream(StdStream::Stderr)?;
//! stdio.reopen(Path::new("/var/log/ffmpeg.log"), "a", stderr)?;
//! ```
//!
//! The standard streams are looked up as the `stdout`/`stderr` variables
//! glibc and musl export. `msvcrt.dll` has no such export, so on Windows
//! only streams opened through [`StdIoLibrary::open`] are available.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;

use tracing::debug;

use crate::error::{AvcError, Result};
use crate::library::{function_table, NativeLibrary};
use crate::platform::Os;

/// Standard output streams of the C runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    fn symbol(&self) -> &'static str {
        match self {
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }
}

/// Opaque `FILE *`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CFile(*mut c_void);

// A FILE* is only an address here; the C runtime serializes access to it.
unsafe impl Send for CFile {}
unsafe impl Sync for CFile {}

impl CFile {
    /// Wrap a raw stream pointer, NULL is rejected
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        (!ptr.is_null()).then_some(Self(ptr))
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.0
    }
}

function_table! {
    /// File stream calls of the C runtime (`libc.so.6`, `msvcrt.dll`)
    pub struct StdIoLibrary("c") {
        fopen: "fopen" => unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_void,
        freopen: "freopen" => unsafe extern "C" fn(*const c_char, *const c_char, *mut c_void) -> *mut c_void,
        fflush: "fflush" => unsafe extern "C" fn(*mut c_void) -> c_int,
        fclose: "fclose" => unsafe extern "C" fn(*mut c_void) -> c_int,
    }
}

impl StdIoLibrary {
    /// Bind the C runtime of `os`
    pub fn load(os: Os) -> Result<Self> {
        Self::bind(open_runtime(os.std_io_libraries())?)
    }

    /// Current `FILE *` of a standard stream
    pub fn std_stream(&self, stream: StdStream) -> Result<CFile> {
        // Data symbol: the address of the runtime's `FILE *` variable
        let var = unsafe { self.library().symbol::<*mut *mut c_void>(stream.symbol())? };
        let ptr = unsafe { *var };
        CFile::from_raw(ptr).ok_or_else(|| {
            AvcError::Io(std::io::Error::other(format!("{} is not open", stream.symbol())))
        })
    }

    /// `fopen(path, mode)`
    pub fn open(&self, path: &Path, mode: &str) -> Result<CFile> {
        let c_path = to_c_string(&path.to_string_lossy())?;
        let c_mode = to_c_string(mode)?;

        let ptr = unsafe { (self.fopen)(c_path.as_ptr(), c_mode.as_ptr()) };
        CFile::from_raw(ptr).ok_or_else(|| {
            AvcError::Io(std::io::Error::other(format!("fopen('{}', '{}') failed", path.display(), mode)))
        })
    }

    /// `freopen(path, mode, stream)`: point an existing stream at `path`
    pub fn reopen(&self, path: &Path, mode: &str, stream: CFile) -> Result<CFile> {
        let c_path = to_c_string(&path.to_string_lossy())?;
        let c_mode = to_c_string(mode)?;

        let ptr = unsafe { (self.freopen)(c_path.as_ptr(), c_mode.as_ptr(), stream.as_raw()) };
        CFile::from_raw(ptr).ok_or_else(|| {
            AvcError::Io(std::io::Error::other(format!("freopen('{}', '{}') failed", path.display(), mode)))
        })
    }

    /// `fflush(stream)`. `None` flushes every output stream.
    pub fn flush(&self, stream: Option<CFile>) -> Result<()> {
        let raw = stream.map_or(std::ptr::null_mut(), |s| s.as_raw());
        match unsafe { (self.fflush)(raw) } {
            0 => Ok(()),
            _ => Err(std::io::Error::last_os_error().into()),
        }
    }

    /// `fclose(stream)`. The handle must not be used afterwards.
    pub fn close(&self, stream: CFile) -> Result<()> {
        match unsafe { (self.fclose)(stream.as_raw()) } {
            0 => Ok(()),
            _ => Err(std::io::Error::last_os_error().into()),
        }
    }
}

/// Open the first C runtime candidate that loads. On Unix the symbols already
/// mapped into the process are the last resort, since every process there
/// links a C runtime.
fn open_runtime(candidates: &[&str]) -> Result<NativeLibrary> {
    let mut errors = Vec::new();
    for file_name in candidates {
        match NativeLibrary::open_system(StdIoLibrary::LIBRARY, file_name) {
            Ok(library) => {
                debug!("C runtime bound from {}", file_name);
                return Ok(library);
            }
            Err(e) => errors.push(e.to_string()),
        }
    }

    #[cfg(unix)]
    if !candidates.is_empty() {
        debug!("No C runtime candidate loaded ({}), using process symbols", errors.join("; "));
        return Ok(NativeLibrary::this(StdIoLibrary::LIBRARY));
    }

    Err(AvcError::LibraryNotLoaded {
        name: StdIoLibrary::LIBRARY.to_string(),
        message: errors.join("; "),
    })
}

fn to_c_string(value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| AvcError::InvalidArgument(format!("'{value}' contains a NUL byte")))
}
