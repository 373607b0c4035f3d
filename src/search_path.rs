// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Native library search path
//!
//! Ordered list of directories scanned for shared objects. Owned by the
//! loaded [`NativeAvc`](crate::native::NativeAvc) rather than kept in a
//! process-wide variable.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{check_value, Result};
use crate::platform::Os;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `PATH`-like value. Empty and non-existent entries are skipped.
    pub fn parse(value: &str, os: Os) -> Self {
        let mut path = Self::new();
        for entry in value.split(os.path_separator()) {
            if entry.trim().is_empty() {
                continue;
            }
            if let Err(e) = path.append(entry) {
                debug!("Skipping search path entry {}: {}", entry, e);
            }
        }
        path
    }

    /// Append a directory. Duplicates (after canonicalization) are ignored.
    pub fn append(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref().canonicalize()?;
        if !self.dirs.contains(&dir) {
            debug!("Search path += {}", dir.display());
            self.dirs.push(dir);
        }
        Ok(())
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Join into a value suitable for `LD_LIBRARY_PATH` / `PATH`
    pub fn to_env_value(&self, os: Os) -> String {
        self.dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(&os.path_separator().to_string())
    }

    /// All shared objects for `lib_name` found in the search path, sorted by
    /// path.
    pub fn find_shared_libs(&self, lib_name: &str, os: Os) -> Result<Vec<PathBuf>> {
        check_value("library name", lib_name)?;

        let mut found = Vec::new();
        for dir in &self.dirs {
            found.extend(shared_libs_in_dir(dir, lib_name, os)?);
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Preferred shared object for `lib_name`: the first directory holding a
    /// match wins, and inside it the last match by path. With versioned
    /// sonames (`libavutil.so`, `libavutil.so.58`, `libavutil.so.58.29.100`)
    /// that is the most specific one.
    pub fn find_shared_lib(&self, lib_name: &str, os: Os) -> Result<Option<PathBuf>> {
        check_value("library name", lib_name)?;

        for dir in &self.dirs {
            if let Some(path) = shared_libs_in_dir(dir, lib_name, os)?.pop() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

fn shared_libs_in_dir(dir: &Path, lib_name: &str, os: Os) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Can not read {}: {}", dir.display(), e);
            return Ok(Vec::new());
        }
    };

    let mut found = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| is_shared_lib_file(n, lib_name, os));
        if matches {
            trace!("Candidate for {}: {}", lib_name, path.display());
            found.push(path.canonicalize()?);
        }
    }

    found.sort();
    Ok(found)
}

/// `libavutil.so.58`, `avutil-58.dll`, `libavutil-58.dll` for `avutil`
fn is_shared_lib_file(file_name: &str, lib_name: &str, os: Os) -> bool {
    let stem = file_name.strip_prefix("lib").unwrap_or(file_name);
    let Some(rest) = stem.strip_prefix(lib_name) else {
        return false;
    };
    if !(rest.starts_with('.') || rest.starts_with('-')) {
        return false;
    }

    let ext = os.shared_lib_extension();
    match os {
        // Versioned sonames put the suffix in the middle
        Os::Linux => rest.split('.').any(|part| part == ext),
        Os::Windows => rest
            .rsplit('.')
            .next()
            .is_some_and(|last| last.eq_ignore_ascii_case(ext)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_shared_lib_matching() {
        assert!(is_shared_lib_file("libavutil.so", "avutil", Os::Linux));
        assert!(is_shared_lib_file("libavutil.so.58", "avutil", Os::Linux));
        assert!(is_shared_lib_file("libavutil.so.58.29.100", "avutil", Os::Linux));
        assert!(!is_shared_lib_file("libavutil.a", "avutil", Os::Linux));
        assert!(!is_shared_lib_file("libavutilx.so", "avutil", Os::Linux));
        assert!(!is_shared_lib_file("libavcodec.so", "avutil", Os::Linux));

        assert!(is_shared_lib_file("avutil-58.dll", "avutil", Os::Windows));
        assert!(is_shared_lib_file("AVUTIL-58.DLL", "AVUTIL", Os::Windows));
        assert!(!is_shared_lib_file("avutil-58.lib", "avutil", Os::Windows));
        assert!(!is_shared_lib_file("avutil.so", "avutil", Os::Windows));
    }

    #[test]
    fn test_find_shared_libs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libavutil.so");
        touch(dir.path(), "libavutil.so.58");
        touch(dir.path(), "libavutil.so.58.29.100");
        touch(dir.path(), "libavcodec.so.60");

        let mut path = SearchPath::new();
        path.append(dir.path()).unwrap();

        let libs = path.find_shared_libs("avutil", Os::Linux).unwrap();
        assert_eq!(libs.len(), 3);
        assert!(libs.windows(2).all(|w| w[0] <= w[1]));

        let best = path.find_shared_lib("avutil", Os::Linux).unwrap().unwrap();
        assert!(best.ends_with("libavutil.so.58.29.100"));
    }

    #[test]
    fn test_find_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libswscale.so.7");

        let mut path = SearchPath::new();
        path.append(dir.path()).unwrap();

        let first = path.find_shared_lib("swscale", Os::Linux).unwrap();
        let second = path.find_shared_lib("swscale", Os::Linux).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_first_directory_wins() {
        let user = tempfile::tempdir().unwrap();
        let bundled = tempfile::tempdir().unwrap();
        touch(user.path(), "libavcodec.so.59");
        touch(bundled.path(), "libavcodec.so.60");

        let mut path = SearchPath::new();
        path.append(user.path()).unwrap();
        path.append(bundled.path()).unwrap();

        let best = path.find_shared_lib("avcodec", Os::Linux).unwrap().unwrap();
        assert!(best.ends_with("libavcodec.so.59"));
        assert_eq!(path.find_shared_libs("avcodec", Os::Linux).unwrap().len(), 2);
    }

    #[test]
    fn test_find_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut path = SearchPath::new();
        path.append(dir.path()).unwrap();

        assert!(path.find_shared_lib("avdevice", Os::Linux).unwrap().is_none());
        assert!(path.find_shared_libs("", Os::Linux).is_err());
    }

    #[test]
    fn test_append_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut path = SearchPath::new();
        path.append(dir.path()).unwrap();
        path.append(dir.path().join(".")).unwrap();

        assert_eq!(path.dirs().len(), 1);
        assert!(path.append(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_parse_and_env_value() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let value = format!(
            "{}::{}:/definitely/not/here",
            a.path().display(),
            b.path().display()
        );

        let path = SearchPath::parse(&value, Os::Linux);
        assert_eq!(path.dirs().len(), 2);

        let env = path.to_env_value(Os::Linux);
        assert_eq!(env.split(':').count(), 2);
    }
}
