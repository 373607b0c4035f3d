// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Packaged Native Resources
//!
//! Native binaries ship as archives named after the platform-qualified
//! resource name, e.g. `ffmpeg-6.1.1-linux-x86_64.zip`. Entries are rooted at
//! `ffmpeg-6.1.1-linux-x86_64/` and are unpacked verbatim into the temp
//! directory, so the loader ends up with `<tmp>/ffmpeg-6.1.1-linux-x86_64/`.
//!
//! # Archive formats
//!
//! - `.zip`
//! - `.tar.gz` / `.tgz`
//! - `.tar`
//! - a plain directory (used in place, nothing is copied)

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::error::{check_value, AvcError, Result};
use crate::metrics::record_unpack_duration;

/// Written into an unpacked directory once extraction completed
pub const UNPACKED_MARKER: &str = ".unpacked";

/// A packaged resource located in the resource directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackagedResource {
    Zip(PathBuf),
    TarGz(PathBuf),
    Tar(PathBuf),
    Directory(PathBuf),
}

impl PackagedResource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Zip(p) | Self::TarGz(p) | Self::Tar(p) | Self::Directory(p) => p,
        }
    }
}

/// Directory holding packaged native archives
#[derive(Debug, Clone)]
pub struct ResourceStore {
    dir: PathBuf,
}

impl ResourceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Find the resource for `native_name`, archives first
    pub fn locate(&self, native_name: &str) -> Result<PackagedResource> {
        check_value("resource name", native_name)?;

        let candidates: [(String, fn(PathBuf) -> PackagedResource); 4] = [
            (format!("{native_name}.zip"), PackagedResource::Zip),
            (format!("{native_name}.tar.gz"), PackagedResource::TarGz),
            (format!("{native_name}.tgz"), PackagedResource::TarGz),
            (format!("{native_name}.tar"), PackagedResource::Tar),
        ];

        for (file_name, kind) in candidates {
            let path = self.dir.join(file_name);
            if path.is_file() {
                return Ok(kind(path));
            }
        }

        let dir = self.dir.join(native_name);
        if dir.is_dir() {
            return Ok(PackagedResource::Directory(dir));
        }

        Err(AvcError::ResourceNotFound {
            name: native_name.to_string(),
            dir: self.dir.clone(),
        })
    }

    /// Unpack `native_name` into `temp_dir` and return the native directory.
    ///
    /// A previous extraction is reused when its marker file is present and
    /// `force` is not set.
    pub fn unpack(&self, native_name: &str, temp_dir: &Path, force: bool) -> Result<PathBuf> {
        let resource = self.locate(native_name)?;

        if let PackagedResource::Directory(dir) = resource {
            info!("Using unpacked native directory {}", dir.display());
            return Ok(dir.canonicalize()?);
        }

        let temp_dir = temp_dir.canonicalize()?;
        let native_dir = temp_dir.join(native_name);

        if !force && native_dir.join(UNPACKED_MARKER).is_file() {
            debug!("Reusing {}", native_dir.display());
            return Ok(native_dir);
        }

        let start = Instant::now();
        info!(
            "Unpacking {} into {}",
            resource.path().display(),
            temp_dir.display()
        );
        unpack_archive(&resource, &temp_dir)?;
        record_unpack_duration(start.elapsed());

        if !native_dir.is_dir() {
            return Err(AvcError::Unpack {
                archive: resource.path().to_path_buf(),
                message: format!("archive has no top-level '{native_name}' directory"),
            });
        }

        std::fs::write(native_dir.join(UNPACKED_MARKER), native_name)?;
        Ok(native_dir)
    }
}

/// Extract an archive resource into an existing directory, keeping the
/// directory structure. Entries escaping `out_dir` are rejected.
pub fn unpack_archive(resource: &PackagedResource, out_dir: &Path) -> Result<()> {
    if !out_dir.is_dir() {
        return Err(AvcError::InvalidArgument(format!(
            "Incorrect output directory '{}'!",
            out_dir.display()
        )));
    }

    let archive_path = resource.path().to_path_buf();
    let unpack_err = |message: String| AvcError::Unpack {
        archive: archive_path.clone(),
        message,
    };

    match resource {
        PackagedResource::Zip(path) => {
            let mut archive =
                zip::ZipArchive::new(File::open(path)?).map_err(|e| unpack_err(e.to_string()))?;
            archive
                .extract(out_dir)
                .map_err(|e| unpack_err(e.to_string()))?;
        }
        PackagedResource::TarGz(path) => {
            let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
            archive.set_preserve_permissions(true);
            archive
                .unpack(out_dir)
                .map_err(|e| unpack_err(e.to_string()))?;
        }
        PackagedResource::Tar(path) => {
            let mut archive = tar::Archive::new(File::open(path)?);
            archive.set_preserve_permissions(true);
            archive
                .unpack(out_dir)
                .map_err(|e| unpack_err(e.to_string()))?;
        }
        PackagedResource::Directory(_) => {
            return Err(unpack_err("not an archive".to_string()));
        }
    }

    Ok(())
}
