// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! FFmpeg function tables
//!
//! One typed table per FFmpeg shared library. Every library exports the same
//! three informational symbols (`<lib>_version`, `<lib>_license`,
//! `<lib>_configuration`), exposed through [`FfmpegLibrary`]. A few
//! library-wide setup calls are bound on top of those.
//!
//! # Load order
//!
//! The dynamic loader resolves each library's dependencies against objects
//! that are already loaded, so binding follows [`LOAD_ORDER`]:
//!
//! ```text
//! avutil -> avcodec -> avformat -> swresample -> swscale -> avfilter -> avdevice
//! ```

use std::os::raw::{c_char, c_int, c_uint};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info};

use crate::error::Result;
use crate::library::{c_string, function_table, LibVersion, NativeLibrary};
use crate::metrics::{record_library_failure, record_library_loaded};

/// Libraries in dependency order, most basic first
pub const LOAD_ORDER: [&str; 7] = [
    Avutil::LIBRARY,
    Avcodec::LIBRARY,
    Avformat::LIBRARY,
    Swresample::LIBRARY,
    Swscale::LIBRARY,
    Avfilter::LIBRARY,
    Avdevice::LIBRARY,
];

/// Log levels understood by `av_log_set_level`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvLogLevel {
    Quiet,
    Panic,
    Fatal,
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
    Trace,
}

impl AvLogLevel {
    pub fn as_raw(&self) -> c_int {
        match self {
            AvLogLevel::Quiet => -8,
            AvLogLevel::Panic => 0,
            AvLogLevel::Fatal => 8,
            AvLogLevel::Error => 16,
            AvLogLevel::Warning => 24,
            AvLogLevel::Info => 32,
            AvLogLevel::Verbose => 40,
            AvLogLevel::Debug => 48,
            AvLogLevel::Trace => 56,
        }
    }
}

/// Informational calls shared by every FFmpeg library
pub trait FfmpegLibrary: Send + Sync {
    /// Library name without prefix or suffix (`avcodec`)
    fn name(&self) -> &'static str;

    fn version(&self) -> LibVersion;

    fn license(&self) -> String;

    fn configuration(&self) -> String;

    /// Shared object this table was bound from
    fn path(&self) -> PathBuf;
}

macro_rules! ffmpeg_library {
    ($name:ident, $version:ident, $license:ident, $configuration:ident) => {
        impl FfmpegLibrary for $name {
            fn name(&self) -> &'static str {
                Self::LIBRARY
            }

            fn version(&self) -> LibVersion {
                LibVersion::from_packed(unsafe { (self.$version)() })
            }

            fn license(&self) -> String {
                unsafe { c_string((self.$license)()) }
            }

            fn configuration(&self) -> String {
                unsafe { c_string((self.$configuration)()) }
            }

            fn path(&self) -> PathBuf {
                self.library().path().to_path_buf()
            }
        }
    };
}

function_table! {
    /// libavutil: common utilities, required by everything else
    pub struct Avutil("avutil") {
        avutil_version: "avutil_version" => unsafe extern "C" fn() -> c_uint,
        avutil_license: "avutil_license" => unsafe extern "C" fn() -> *const c_char,
        avutil_configuration: "avutil_configuration" => unsafe extern "C" fn() -> *const c_char,
        av_version_info: "av_version_info" => unsafe extern "C" fn() -> *const c_char,
        av_log_set_level: "av_log_set_level" => unsafe extern "C" fn(c_int),
        av_log_get_level: "av_log_get_level" => unsafe extern "C" fn() -> c_int,
    }
}
ffmpeg_library!(Avutil, avutil_version, avutil_license, avutil_configuration);

impl Avutil {
    /// Release string of the whole suite (`6.1.1`, `n6.1.1-3-g...`)
    pub fn version_info(&self) -> String {
        unsafe { c_string((self.av_version_info)()) }
    }

    pub fn set_log_level(&self, level: AvLogLevel) {
        unsafe { (self.av_log_set_level)(level.as_raw()) }
    }

    pub fn log_level(&self) -> c_int {
        unsafe { (self.av_log_get_level)() }
    }
}

function_table! {
    /// libavcodec: encoders and decoders. Requires avutil.
    pub struct Avcodec("avcodec") {
        avcodec_version: "avcodec_version" => unsafe extern "C" fn() -> c_uint,
        avcodec_license: "avcodec_license" => unsafe extern "C" fn() -> *const c_char,
        avcodec_configuration: "avcodec_configuration" => unsafe extern "C" fn() -> *const c_char,
    }
}
ffmpeg_library!(Avcodec, avcodec_version, avcodec_license, avcodec_configuration);

function_table! {
    /// libavformat: muxers, demuxers and protocols. Requires avcodec.
    pub struct Avformat("avformat") {
        avformat_version: "avformat_version" => unsafe extern "C" fn() -> c_uint,
        avformat_license: "avformat_license" => unsafe extern "C" fn() -> *const c_char,
        avformat_configuration: "avformat_configuration" => unsafe extern "C" fn() -> *const c_char,
        avformat_network_init: "avformat_network_init" => unsafe extern "C" fn() -> c_int,
        avformat_network_deinit: "avformat_network_deinit" => unsafe extern "C" fn() -> c_int,
    }
}
ffmpeg_library!(Avformat, avformat_version, avformat_license, avformat_configuration);

impl Avformat {
    /// Initialize network protocols (TLS libraries and the like).
    /// Returns the raw FFmpeg status, negative on failure.
    pub fn network_init(&self) -> c_int {
        unsafe { (self.avformat_network_init)() }
    }

    pub fn network_deinit(&self) -> c_int {
        unsafe { (self.avformat_network_deinit)() }
    }
}

function_table! {
    /// libswresample: audio resampling and sample format conversion. Requires avutil.
    pub struct Swresample("swresample") {
        swresample_version: "swresample_version" => unsafe extern "C" fn() -> c_uint,
        swresample_license: "swresample_license" => unsafe extern "C" fn() -> *const c_char,
        swresample_configuration: "swresample_configuration" => unsafe extern "C" fn() -> *const c_char,
    }
}
ffmpeg_library!(Swresample, swresample_version, swresample_license, swresample_configuration);

function_table! {
    /// libswscale: image scaling and pixel format conversion. Requires avutil.
    pub struct Swscale("swscale") {
        swscale_version: "swscale_version" => unsafe extern "C" fn() -> c_uint,
        swscale_license: "swscale_license" => unsafe extern "C" fn() -> *const c_char,
        swscale_configuration: "swscale_configuration" => unsafe extern "C" fn() -> *const c_char,
    }
}
ffmpeg_library!(Swscale, swscale_version, swscale_license, swscale_configuration);

function_table! {
    /// libavfilter: filter graphs. Requires swresample, swscale, avformat,
    /// avcodec and avutil.
    pub struct Avfilter("avfilter") {
        avfilter_version: "avfilter_version" => unsafe extern "C" fn() -> c_uint,
        avfilter_license: "avfilter_license" => unsafe extern "C" fn() -> *const c_char,
        avfilter_configuration: "avfilter_configuration" => unsafe extern "C" fn() -> *const c_char,
    }
}
ffmpeg_library!(Avfilter, avfilter_version, avfilter_license, avfilter_configuration);

function_table! {
    /// libavdevice: capture and playback devices. Requires avfilter and avformat.
    pub struct Avdevice("avdevice") {
        avdevice_version: "avdevice_version" => unsafe extern "C" fn() -> c_uint,
        avdevice_license: "avdevice_license" => unsafe extern "C" fn() -> *const c_char,
        avdevice_configuration: "avdevice_configuration" => unsafe extern "C" fn() -> *const c_char,
        avdevice_register_all: "avdevice_register_all" => unsafe extern "C" fn(),
    }
}
ffmpeg_library!(Avdevice, avdevice_version, avdevice_license, avdevice_configuration);

impl Avdevice {
    /// Register every compiled-in input/output device with avformat
    pub fn register_all(&self) {
        unsafe { (self.avdevice_register_all)() }
    }
}

/// Version report of one bound library
#[derive(Debug, Clone, Serialize)]
pub struct LibraryReport {
    pub name: &'static str,
    pub version: LibVersion,
    pub license: String,
    pub path: PathBuf,
}

/// The whole FFmpeg suite, bound in [`LOAD_ORDER`]
#[derive(Debug)]
pub struct FfmpegLibraries {
    pub avutil: Avutil,
    pub avcodec: Avcodec,
    pub avformat: Avformat,
    pub swresample: Swresample,
    pub swscale: Swscale,
    pub avfilter: Avfilter,
    pub avdevice: Avdevice,
}

impl FfmpegLibraries {
    /// Bind every library in dependency order.
    ///
    /// `open` maps a library name to an opened handle. The first failure
    /// aborts loading; libraries opened before it are closed again.
    pub fn load<F>(mut open: F) -> Result<Self>
    where
        F: FnMut(&'static str) -> Result<NativeLibrary>,
    {
        let avutil = bind_table(&mut open, Avutil::LIBRARY, Avutil::bind)?;
        let avcodec = bind_table(&mut open, Avcodec::LIBRARY, Avcodec::bind)?;
        let avformat = bind_table(&mut open, Avformat::LIBRARY, Avformat::bind)?;
        let swresample = bind_table(&mut open, Swresample::LIBRARY, Swresample::bind)?;
        let swscale = bind_table(&mut open, Swscale::LIBRARY, Swscale::bind)?;
        let avfilter = bind_table(&mut open, Avfilter::LIBRARY, Avfilter::bind)?;
        let avdevice = bind_table(&mut open, Avdevice::LIBRARY, Avdevice::bind)?;

        let libs = Self {
            avutil,
            avcodec,
            avformat,
            swresample,
            swscale,
            avfilter,
            avdevice,
        };

        info!(
            "FFmpeg {} loaded (avutil {}, avcodec {}, avformat {})",
            libs.avutil.version_info(),
            libs.avutil.version(),
            libs.avcodec.version(),
            libs.avformat.version()
        );

        Ok(libs)
    }

    /// Every library, in load order
    pub fn all(&self) -> [&dyn FfmpegLibrary; 7] {
        [
            &self.avutil,
            &self.avcodec,
            &self.avformat,
            &self.swresample,
            &self.swscale,
            &self.avfilter,
            &self.avdevice,
        ]
    }

    pub fn get(&self, name: &str) -> Option<&dyn FfmpegLibrary> {
        self.all().into_iter().find(|lib| lib.name() == name)
    }

    pub fn reports(&self) -> Vec<LibraryReport> {
        self.all()
            .iter()
            .map(|lib| LibraryReport {
                name: lib.name(),
                version: lib.version(),
                license: lib.license(),
                path: lib.path(),
            })
            .collect()
    }
}

/// Open `name` and resolve its table. Open and symbol failures both count
/// as a failed library.
fn bind_table<T, F>(
    open: &mut F,
    name: &'static str,
    bind: fn(NativeLibrary) -> Result<T>,
) -> Result<T>
where
    F: FnMut(&'static str) -> Result<NativeLibrary>,
{
    match open(name).and_then(bind) {
        Ok(table) => {
            record_library_loaded(name);
            Ok(table)
        }
        Err(e) => {
            error!("Failed to load {}: {}", name, e);
            record_library_failure(name);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AvcError;
    use crate::metrics::testing::CountingRecorder;

    #[test]
    fn test_load_order() {
        assert_eq!(
            LOAD_ORDER,
            [
                "avutil",
                "avcodec",
                "avformat",
                "swresample",
                "swscale",
                "avfilter",
                "avdevice"
            ]
        );
    }

    #[test]
    fn test_load_stops_at_first_failure() {
        let mut requested = Vec::new();
        let result = FfmpegLibraries::load(|name| {
            requested.push(name);
            Err(AvcError::LibraryNotFound {
                name: name.to_string(),
                search_path: String::new(),
            })
        });

        assert!(matches!(
            result,
            Err(AvcError::LibraryNotFound { ref name, .. }) if name == "avutil"
        ));
        assert_eq!(requested, vec!["avutil"]);
    }

    #[test]
    fn test_open_failure_counted() {
        let recorder = CountingRecorder::default();
        let result = metrics::with_local_recorder(&recorder, || {
            FfmpegLibraries::load(|name| {
                Err(AvcError::LibraryNotLoaded {
                    name: name.to_string(),
                    message: "bad ELF header".to_string(),
                })
            })
        });

        assert!(result.is_err());
        assert_eq!(
            recorder.counted(),
            vec!["avc_native_library_failures_total{library=avutil}"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_symbol_counted() {
        // The test process exports none of the avutil symbols
        let recorder = CountingRecorder::default();
        let result = metrics::with_local_recorder(&recorder, || {
            FfmpegLibraries::load(|name| Ok(NativeLibrary::this(name)))
        });

        assert!(matches!(
            result,
            Err(AvcError::SymbolNotFound { symbol: "avutil_version", .. })
        ));
        assert_eq!(
            recorder.counted(),
            vec!["avc_native_library_failures_total{library=avutil}"]
        );
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(AvLogLevel::Quiet.as_raw(), -8);
        assert_eq!(AvLogLevel::Error.as_raw(), 16);
        assert_eq!(AvLogLevel::Info.as_raw(), 32);
        assert_eq!(AvLogLevel::Trace.as_raw(), 56);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_bind_fails_on_missing_symbols() {
        // libc exports none of the avutil symbols
        let library = NativeLibrary::open_system("avutil", "libc.so.6").unwrap();
        let err = Avutil::bind(library).unwrap_err();
        assert!(matches!(
            err,
            AvcError::SymbolNotFound { symbol: "avutil_version", .. }
        ));
    }
}
