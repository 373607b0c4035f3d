// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Loaded native suite
//!
//! [`NativeAvc::load`] performs the whole startup sequence once:
//!
//! 1. select the platform profile (fails on unsupported hosts)
//! 2. bind the C runtime's `stdio` calls
//! 3. unpack `<name>-<version>-<os>-<arch>` into the temp directory
//! 4. append the unpacked directory to the library search path
//! 5. bind every FFmpeg library in dependency order
//!
//! Any failure aborts the sequence. Afterwards the value is read-only and is
//! shared through `Arc` (see [`AvcContext`](crate::context::AvcContext)).

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::AvcConfig;
use crate::error::{check_value, AvcError, Result};
use crate::ffmpeg::{FfmpegLibraries, LibraryReport};
use crate::library::NativeLibrary;
use crate::metrics::record_init_duration;
use crate::platform::{Os, Platform};
use crate::process::{self, Binary, ProcessOutput};
use crate::resource::ResourceStore;
use crate::search_path::SearchPath;
use crate::stdio::StdIoLibrary;

/// Version report of the whole native suite
#[derive(Debug, Clone, Serialize)]
pub struct NativeReport {
    pub platform: Platform,
    pub native_dir: PathBuf,
    pub version_info: String,
    pub libraries: Vec<LibraryReport>,
}

/// Runs the companion executables shipped in one native directory
#[derive(Debug, Clone)]
pub struct Launcher {
    os: Os,
    native_dir: PathBuf,
    capture_stderr: bool,
}

impl Launcher {
    pub fn new(os: Os, native_dir: impl Into<PathBuf>, capture_stderr: bool) -> Self {
        Self {
            os,
            native_dir: native_dir.into(),
            capture_stderr,
        }
    }

    pub fn native_dir(&self) -> &Path {
        &self.native_dir
    }

    /// Full path of a companion executable in the native directory.
    ///
    /// `name` must be a plain file name; absolute paths and anything with a
    /// directory part are refused so the lookup never leaves the directory.
    pub fn binary_path(&self, name: &str) -> Result<PathBuf> {
        check_value("binary name", name)?;
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) if file == name => {
                Ok(self.native_dir.join(self.os.executable_name(name)))
            }
            _ => Err(AvcError::InvalidArgument(format!(
                "'{name}' is not an executable name"
            ))),
        }
    }

    /// Run a companion executable; stderr capture follows the configuration
    pub async fn run(&self, binary: Binary, args: &str) -> Result<ProcessOutput> {
        self.execute(binary, args, self.capture_stderr).await
    }

    /// Run a companion executable with an explicit stderr choice
    pub async fn execute(
        &self,
        binary: Binary,
        args: &str,
        capture_stderr: bool,
    ) -> Result<ProcessOutput> {
        self.execute_named(binary.name(), args, capture_stderr).await
    }

    /// Run any executable shipped in the native directory
    pub async fn execute_named(
        &self,
        name: &str,
        args: &str,
        capture_stderr: bool,
    ) -> Result<ProcessOutput> {
        let bin_file = self.binary_path(name)?;
        process::run(self.os, &bin_file, args, capture_stderr).await
    }
}

#[derive(Debug)]
pub struct NativeAvc {
    platform: Platform,
    launcher: Launcher,
    search_path: SearchPath,
    stdio: StdIoLibrary,
    libs: FfmpegLibraries,
}

impl NativeAvc {
    /// Unpack the native suite for this host and bind every library
    pub fn load(config: &AvcConfig) -> Result<Self> {
        Self::load_for(Platform::detect()?, config)
    }

    /// Same as [`NativeAvc::load`] with an explicit platform profile
    pub fn load_for(platform: Platform, config: &AvcConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();
        info!("Loading native suite for {}", platform);

        let stdio = StdIoLibrary::load(platform.os)?;

        let native_name = platform.native_name(&config.native_name, &config.native_version)?;
        let store = ResourceStore::new(&config.resource_dir);
        let native_dir = store.unpack(&native_name, &config.temp_dir, config.force_unpack)?;

        let mut search_path = config
            .library_path
            .as_deref()
            .map(|value| SearchPath::parse(value, platform.os))
            .unwrap_or_default();
        search_path.append(&native_dir)?;
        debug!("Library search path: {}", search_path.to_env_value(platform.os));

        let libs = FfmpegLibraries::load(|name| {
            open_library(&search_path, platform.os, name, config.allow_system_libraries)
        })?;

        record_init_duration(start.elapsed());
        info!(
            "Native suite ready in {:?} ({})",
            start.elapsed(),
            native_dir.display()
        );

        Ok(Self {
            platform,
            launcher: Launcher::new(platform.os, native_dir, config.capture_stderr),
            search_path,
            stdio,
            libs,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Directory the native suite was unpacked to
    pub fn native_dir(&self) -> &Path {
        self.launcher.native_dir()
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    pub fn libs(&self) -> &FfmpegLibraries {
        &self.libs
    }

    pub fn stdio(&self) -> &StdIoLibrary {
        &self.stdio
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Shared object currently preferred for `name`
    pub fn find_lib(&self, name: &str) -> Result<PathBuf> {
        find_lib(&self.search_path, self.platform.os, name)
    }

    pub fn binary_path(&self, name: &str) -> Result<PathBuf> {
        self.launcher.binary_path(name)
    }

    pub async fn run(&self, binary: Binary, args: &str) -> Result<ProcessOutput> {
        self.launcher.run(binary, args).await
    }

    pub async fn execute(
        &self,
        binary: Binary,
        args: &str,
        capture_stderr: bool,
    ) -> Result<ProcessOutput> {
        self.launcher.execute(binary, args, capture_stderr).await
    }

    pub async fn execute_named(
        &self,
        name: &str,
        args: &str,
        capture_stderr: bool,
    ) -> Result<ProcessOutput> {
        self.launcher.execute_named(name, args, capture_stderr).await
    }

    pub fn report(&self) -> NativeReport {
        NativeReport {
            platform: self.platform,
            native_dir: self.native_dir().to_path_buf(),
            version_info: self.libs.avutil.version_info(),
            libraries: self.libs.reports(),
        }
    }
}

fn find_lib(search_path: &SearchPath, os: Os, name: &str) -> Result<PathBuf> {
    search_path
        .find_shared_lib(name, os)?
        .ok_or_else(|| AvcError::LibraryNotFound {
            name: name.to_string(),
            search_path: search_path.to_env_value(os),
        })
}

/// File name the platform loader resolves on its own
fn system_library_name(os: Os, name: &str) -> String {
    match os {
        Os::Linux => format!("lib{name}.so"),
        Os::Windows => format!("{name}.dll"),
    }
}

/// Open `name` from the search path. Libraries missing from it are only
/// looked up system-wide when `allow_system` is set.
fn open_library(
    search_path: &SearchPath,
    os: Os,
    name: &str,
    allow_system: bool,
) -> Result<NativeLibrary> {
    match find_lib(search_path, os, name) {
        Ok(path) => NativeLibrary::open(name, &path),
        Err(AvcError::LibraryNotFound { .. }) if allow_system => {
            info!("{} not bundled, trying the system loader", name);
            NativeLibrary::open_system(name, &system_library_name(os, name))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_library_name() {
        assert_eq!(system_library_name(Os::Linux, "avutil"), "libavutil.so");
        assert_eq!(system_library_name(Os::Windows, "avutil"), "avutil.dll");
    }

    #[test]
    fn test_open_library_not_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let mut path = SearchPath::new();
        path.append(dir.path()).unwrap();

        let err = open_library(&path, Os::Linux, "avutil", false).unwrap_err();
        assert!(matches!(err, AvcError::LibraryNotFound { ref name, .. } if name == "avutil"));
    }

    #[test]
    fn test_binary_path_stays_in_native_dir() {
        let launcher = Launcher::new(Os::Linux, "/tmp/ffmpeg-6.1.1-linux-x86_64", true);
        assert_eq!(
            launcher.binary_path("ffprobe").unwrap(),
            PathBuf::from("/tmp/ffmpeg-6.1.1-linux-x86_64/ffprobe")
        );

        for name in ["/bin/echo", "../ffmpeg", "bin/ffmpeg", ".", "..", "ffmpeg/", ""] {
            assert!(launcher.binary_path(name).is_err(), "{name} was accepted");
        }
    }

    #[test]
    fn test_windows_binary_path() {
        let launcher = Launcher::new(Os::Windows, "C:/Temp/native", true);
        assert!(launcher.binary_path("ffmpeg").unwrap().ends_with("ffmpeg.exe"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_refuses_outside_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let native_dir = dir.path().join("native");
        std::fs::create_dir(&native_dir).unwrap();
        let outside = dir.path().join("ffmpeg");
        std::fs::write(&outside, "#!/bin/sh\necho escaped\n").unwrap();
        std::fs::set_permissions(&outside, std::fs::Permissions::from_mode(0o644)).unwrap();

        let launcher = Launcher::new(Os::Linux, &native_dir, true);
        let err = launcher
            .execute_named(outside.to_str().unwrap(), "", true)
            .await
            .unwrap_err();
        assert!(matches!(err, AvcError::InvalidArgument(_)));
        let err = launcher.execute_named("../ffmpeg", "", true).await.unwrap_err();
        assert!(matches!(err, AvcError::InvalidArgument(_)));

        // Mode bits of the outside file are untouched
        let mode = std::fs::metadata(&outside).unwrap().permissions().mode();
        assert_eq!(mode & 0o100, 0);
    }

    #[test]
    fn test_find_lib_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libavformat.so.60"), b"").unwrap();
        let mut path = SearchPath::new();
        path.append(dir.path()).unwrap();

        let first = find_lib(&path, Os::Linux, "avformat").unwrap();
        let second = find_lib(&path, Os::Linux, "avformat").unwrap();
        assert_eq!(first, second);
    }
}
