// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! avc-native: FFmpeg native library loader
//!
//! Unpacks a bundled FFmpeg build for the host platform, binds its shared
//! libraries in dependency order and runs the companion executables
//! (`ffmpeg`, `ffprobe`, `ffserver`). It can be used as a Rust library, as a
//! standalone binary or embedded in a managed runtime via FFI.

pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod ffmpeg;
pub mod library;
pub mod metrics;
pub mod native;
pub mod platform;
pub mod process;
pub mod resource;
pub mod search_path;
pub mod stdio;

// Re-export main types for convenience
pub use config::AvcConfig;
pub use context::{AvcContext, InitOnce};
pub use error::{AvcError, Result};
pub use ffmpeg::{AvLogLevel, FfmpegLibraries, FfmpegLibrary, LibraryReport};
pub use library::{LibVersion, NativeLibrary};
pub use native::{Launcher, NativeAvc, NativeReport};
pub use platform::{Arch, Os, Platform};
pub use process::{Binary, ProcessOutput};
pub use search_path::SearchPath;
pub use stdio::{StdIoLibrary, StdStream};
