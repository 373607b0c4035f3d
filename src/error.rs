// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Error types
//!
//! Every failure aborts the calling operation. There is no partial
//! initialization: a missing archive, an unsupported host or a library that
//! cannot be bound all surface as an [`AvcError`] to the top-level caller.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = AvcError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AvcError {
    /// A required value was empty or otherwise unusable.
    #[error("Value '{name}' should not be empty or null!")]
    EmptyValue { name: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported OS: {0}!")]
    UnsupportedOs(String),

    #[error("Unsupported arch: {0}!")]
    UnsupportedArch(String),

    #[error("can not find packaged resource '{name}' in {dir}")]
    ResourceNotFound { name: String, dir: PathBuf },

    #[error("failed to unpack {archive}: {message}")]
    Unpack { archive: PathBuf, message: String },

    #[error("library '{name}' not found in search path [{search_path}]")]
    LibraryNotFound { name: String, search_path: String },

    #[error("Library '{name}' was not loaded! {message}")]
    LibraryNotLoaded { name: String, message: String },

    #[error("symbol '{symbol}' missing from library '{library}': {message}")]
    SymbolNotFound {
        library: String,
        symbol: &'static str,
        message: String,
    },

    #[error("executable not found: {0}")]
    BinaryNotFound(PathBuf),

    #[error("process '{binary}' failed: {message}")]
    Process { binary: String, message: String },

    #[error("initialization task failed: {0}")]
    Init(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AvcError {
    /// True for errors that mean this host can never load the native suite.
    pub fn is_fatal_platform(&self) -> bool {
        matches!(self, Self::UnsupportedOs(_) | Self::UnsupportedArch(_))
    }
}

/// Reject empty configuration values up front.
pub(crate) fn check_value(name: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AvcError::EmptyValue { name });
    }
    Ok(())
}
