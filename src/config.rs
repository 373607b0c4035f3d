// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{check_value, Result};

/// Default name of the packaged native suite
pub const NATIVE_NAME: &str = "ffmpeg";

/// Default version of the packaged native suite
pub const NATIVE_VERSION: &str = "6.1.1";

/// Configuration of the native loader
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvcConfig {
    /// Directory holding packaged archives (`ffmpeg-6.1.1-linux-x86_64.zip`)
    pub resource_dir: PathBuf,

    /// Name part of the packaged resource
    pub native_name: String,

    /// Version part of the packaged resource
    pub native_version: String,

    /// Where archives are unpacked (system temp dir by default)
    pub temp_dir: PathBuf,

    /// Extra directories searched before the unpacked one
    pub library_path: Option<String>,

    /// Unpack again even if a previous extraction is present
    pub force_unpack: bool,

    /// Let the platform loader find libraries that are not bundled
    pub allow_system_libraries: bool,

    /// Capture stderr of helper processes by default
    pub capture_stderr: bool,
}

impl Default for AvcConfig {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("native"),
            native_name: NATIVE_NAME.to_string(),
            native_version: NATIVE_VERSION.to_string(),
            temp_dir: std::env::temp_dir(),
            library_path: None,
            force_unpack: false,
            allow_system_libraries: false,
            capture_stderr: true,
        }
    }
}

impl AvcConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            resource_dir: std::env::var("AVC_RESOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.resource_dir),
            native_name: std::env::var("AVC_NATIVE_NAME").unwrap_or(defaults.native_name),
            native_version: std::env::var("AVC_NATIVE_VERSION")
                .unwrap_or(defaults.native_version),
            temp_dir: std::env::var("AVC_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            library_path: std::env::var("AVC_LIBRARY_PATH").ok(),
            force_unpack: env_flag("AVC_FORCE_UNPACK").unwrap_or(defaults.force_unpack),
            allow_system_libraries: env_flag("AVC_ALLOW_SYSTEM_LIBRARIES")
                .unwrap_or(defaults.allow_system_libraries),
            capture_stderr: env_flag("AVC_CAPTURE_STDERR").unwrap_or(defaults.capture_stderr),
        }
    }

    /// Same as [`AvcConfig::default`] with another resource directory
    pub fn with_resource_dir(resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_value("native name", &self.native_name)?;
        check_value("native version", &self.native_version)?;
        check_value("resource directory", &self.resource_dir.to_string_lossy())?;
        check_value("temp directory", &self.temp_dir.to_string_lossy())?;
        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
