// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Native library handles and typed function tables
//!
//! [`NativeLibrary`] owns a `dlopen`/`LoadLibrary` handle. Function tables
//! declared with [`function_table!`] copy the resolved symbols out as plain
//! `extern "C"` function pointers and keep the handle alive next to them, so
//! the pointers stay valid for the lifetime of the table.

use std::ffi::CStr;
use std::fmt;
use std::os::raw::{c_char, c_uint};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{AvcError, Result};

/// An opened shared object
pub struct NativeLibrary {
    name: String,
    path: PathBuf,
    library: libloading::Library,
}

impl NativeLibrary {
    /// Open a shared object by absolute path.
    ///
    /// On Unix the library is opened with `RTLD_GLOBAL` so that libraries
    /// opened afterwards resolve their dependencies against it.
    pub fn open(name: &str, path: &Path) -> Result<Self> {
        debug!("Opening {} from {}", name, path.display());
        let library = open_global(path.as_os_str()).map_err(|e| AvcError::LibraryNotLoaded {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            library,
        })
    }

    /// Open a shared object by file name through the platform's default
    /// loader lookup (`libc.so.6`, `msvcrt.dll`, ...)
    pub fn open_system(name: &str, file_name: &str) -> Result<Self> {
        debug!("Opening {} as {}", name, file_name);
        let library = open_global(std::ffi::OsStr::new(file_name)).map_err(|e| AvcError::LibraryNotLoaded {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            path: PathBuf::from(file_name),
            library,
        })
    }

    /// Symbols of the running process and everything it already loaded
    #[cfg(unix)]
    pub fn this(name: &str) -> Self {
        debug!("Using process symbols for {}", name);
        Self {
            name: name.to_string(),
            path: PathBuf::new(),
            library: libloading::os::unix::Library::this().into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve `symbol` as a value of type `T`.
    ///
    /// # Safety
    ///
    /// `T` must match the exported symbol's real type, normally an
    /// `unsafe extern "C" fn(..)` pointer with the C signature.
    pub unsafe fn symbol<T: Copy>(&self, symbol: &'static str) -> Result<T> {
        let resolved: libloading::Symbol<'_, T> = unsafe { self.library.get(symbol.as_bytes()) }
            .map_err(|e| AvcError::SymbolNotFound {
                library: self.name.clone(),
                symbol,
                message: e.to_string(),
            })?;
        Ok(*resolved)
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(unix)]
fn open_global(file: &std::ffi::OsStr) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
    // Safety: initializers of the bundled native suite run here; they are
    // trusted the same way as any linked dependency.
    unsafe { Library::open(Some(file), RTLD_NOW | RTLD_GLOBAL) }.map(Into::into)
}

#[cfg(windows)]
fn open_global(file: &std::ffi::OsStr) -> std::result::Result<libloading::Library, libloading::Error> {
    unsafe { libloading::Library::new(file) }
}

/// Declare a typed function table over a [`NativeLibrary`].
///
/// ```rust,ignore
/// function_table! {
///     /// libavutil
///     pub struct Avutil("avutil") {
///         avutil_version: "avutil_version" => unsafe extern "C" fn() -> c_uint,
///     }
/// }
/// ```
///
/// Generates `Avutil::LIBRARY`, `Avutil::bind(NativeLibrary)` and
/// `Avutil::library()`. Every symbol is resolved in `bind`; a single missing
/// symbol fails the whole table.
macro_rules! function_table {
    (
        $(#[$meta:meta])*
        pub struct $name:ident ($lib:literal) {
            $( $field:ident : $symbol:literal => $ty:ty, )*
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            library: $crate::library::NativeLibrary,
            $( $field: $ty, )*
        }

        impl $name {
            pub const LIBRARY: &'static str = $lib;

            pub fn bind(library: $crate::library::NativeLibrary) -> $crate::error::Result<Self> {
                $(
                    // Safety: the declared type is the C signature of the symbol.
                    let $field = unsafe { library.symbol::<$ty>($symbol)? };
                )*
                Ok(Self {
                    library,
                    $( $field, )*
                })
            }

            pub fn library(&self) -> &$crate::library::NativeLibrary {
                &self.library
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("library", &self.library)
                    .finish()
            }
        }
    };
}

pub(crate) use function_table;

/// Packed FFmpeg library version (`major << 16 | minor << 8 | micro`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LibVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl LibVersion {
    pub fn from_packed(packed: c_uint) -> Self {
        Self {
            major: packed >> 16,
            minor: (packed >> 8) & 0xff,
            micro: packed & 0xff,
        }
    }

    pub fn packed(&self) -> u32 {
        (self.major << 16) | (self.minor << 8) | self.micro
    }
}

impl fmt::Display for LibVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Copy a C string owned by the native side. NULL becomes an empty string.
///
/// # Safety
///
/// `ptr` must be NULL or point to a NUL-terminated string.
pub(crate) unsafe fn c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_char;

    #[test]
    fn test_version_decode() {
        // libavutil 58.29.100
        let packed = (58 << 16) | (29 << 8) | 100;
        let version = LibVersion::from_packed(packed);
        assert_eq!(
            version,
            LibVersion {
                major: 58,
                minor: 29,
                micro: 100
            }
        );
        assert_eq!(version.to_string(), "58.29.100");
        assert_eq!(version.packed(), packed);
    }

    #[test]
    fn test_version_order() {
        let old = LibVersion::from_packed((56 << 16) | (70 << 8) | 100);
        let new = LibVersion::from_packed(58 << 16);
        assert!(old < new);
    }

    #[test]
    fn test_c_string() {
        let text = b"GPL version 2 or later\0";
        let copied = unsafe { c_string(text.as_ptr() as *const c_char) };
        assert_eq!(copied, "GPL version 2 or later");
        assert_eq!(unsafe { c_string(std::ptr::null()) }, "");
    }

    #[test]
    fn test_open_missing_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libavutil.so.58");
        std::fs::write(&path, b"not an elf").unwrap();

        let err = NativeLibrary::open("avutil", &path).unwrap_err();
        assert!(matches!(err, AvcError::LibraryNotLoaded { ref name, .. } if name == "avutil"));
        assert!(err.to_string().starts_with("Library 'avutil' was not loaded!"));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    mod libc_table {
        use super::*;

        function_table! {
            /// `string.h` subset, enough to exercise the macro
            pub struct StringFns("c") {
                strlen: "strlen" => unsafe extern "C" fn(*const c_char) -> usize,
            }
        }

        #[test]
        fn test_bind_table() {
            let library = NativeLibrary::open_system("c", "libc.so.6").unwrap();
            let table = StringFns::bind(library).unwrap();

            let len = unsafe { (table.strlen)(b"avcodec\0".as_ptr() as *const c_char) };
            assert_eq!(len, 7);
            assert_eq!(StringFns::LIBRARY, "c");
            assert_eq!(table.library().name(), "c");
        }

        #[test]
        fn test_missing_symbol() {
            let library = NativeLibrary::open_system("c", "libc.so.6").unwrap();
            let err = unsafe { library.symbol::<unsafe extern "C" fn()>("avutil_version_nope") }
                .unwrap_err();
            assert!(matches!(err, AvcError::SymbolNotFound { .. }));
        }
    }
}
