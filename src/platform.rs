// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Platform Profiles
//!
//! Selects one of a fixed set of OS/architecture profiles. Each profile
//! carries the data the loader and the process launcher need:
//!
//! - shared library suffix (`so`, `dll`)
//! - C runtime library name
//! - how a companion executable is launched
//!
//! Unknown OS or architecture names fail immediately, there is no fallback
//! profile.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tokio::process::Command;

use crate::error::{check_value, AvcError, Result};

/// Separator used inside resource names (`avutil-6.1-linux-x86_64`)
pub const SEPARATOR: &str = "-";

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Windows,
}

impl Os {
    /// Match an OS name as reported by the host (`linux`, `Linux`,
    /// `Windows 10`, `windows`, ...)
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();

        if lower == "linux" {
            return Ok(Os::Linux);
        }
        if lower.starts_with("windows") {
            return Ok(Os::Windows);
        }

        Err(AvcError::UnsupportedOs(name.to_string()))
    }

    pub fn id(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Windows => "windows",
        }
    }

    /// File extension of shared libraries, without the dot
    pub fn shared_lib_extension(&self) -> &'static str {
        match self {
            Os::Linux => "so",
            Os::Windows => "dll",
        }
    }

    /// C runtime candidates providing `stdio.h`, tried in order (glibc first,
    /// then the unversioned name musl answers to)
    pub fn std_io_libraries(&self) -> &'static [&'static str] {
        match self {
            Os::Linux => &["libc.so.6", "libc.so"],
            Os::Windows => &["msvcrt.dll"],
        }
    }

    /// Separator of `PATH`-like variables
    pub fn path_separator(&self) -> char {
        match self {
            Os::Linux => ':',
            Os::Windows => ';',
        }
    }

    /// Library search variable honoured by the dynamic loader
    pub fn library_path_var(&self) -> &'static str {
        match self {
            Os::Linux => "LD_LIBRARY_PATH",
            Os::Windows => "PATH",
        }
    }

    /// File name of a companion executable
    pub fn executable_name(&self, name: &str) -> String {
        match self {
            Os::Windows if !name.to_ascii_lowercase().ends_with(".exe") => format!("{name}.exe"),
            _ => name.to_string(),
        }
    }

    /// Join separate arguments into one command-line string for
    /// [`Os::native_command`], quoting each so the shell hands it back as a
    /// single argument.
    pub fn join_args<S: AsRef<str>>(&self, args: &[S]) -> String {
        match self {
            Os::Linux => shell_words::join(args),
            // cmd.exe only groups on double quotes
            Os::Windows => args
                .iter()
                .map(|arg| {
                    let arg = arg.as_ref();
                    if arg.is_empty() || arg.contains([' ', '\t']) {
                        format!("\"{arg}\"")
                    } else {
                        arg.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Build the shell invocation that runs `bin_file` with `args`.
    ///
    /// `args` is a single command-line string and goes through the shell
    /// unchanged, so quoting is the caller's business.
    ///
    /// Linux: `/bin/sh -c 'exec "$0" <args>' <bin>` with the binary's
    /// directory appended to `LD_LIBRARY_PATH` so bundled `.so` files resolve.
    ///
    /// Windows: `cmd.exe /s /c ""<bin>" <args>"`. With `/s` cmd strips only
    /// the outer quotes, so a binary path containing spaces stays one token.
    /// The DLL search already starts with the executable's directory, so no
    /// variable is touched.
    pub fn native_command(&self, bin_file: &Path, args: &str) -> Command {
        match self {
            Os::Linux => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c")
                    .arg(format!("exec \"$0\" {}", args.trim()))
                    .arg(bin_file);

                if let Some(dir) = bin_file.parent() {
                    let current = std::env::var_os(self.library_path_var());
                    cmd.env(
                        self.library_path_var(),
                        extend_path_var(current, dir, self.path_separator()),
                    );
                }
                cmd
            }
            Os::Windows => {
                let mut cmd = Command::new("cmd.exe");
                cmd.arg("/s").arg("/c");
                let line = format!("\"\"{}\" {}\"", bin_file.display(), args.trim());
                #[cfg(windows)]
                cmd.raw_arg(line);
                #[cfg(not(windows))]
                cmd.arg(line);
                cmd
            }
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Arch {
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Arch {
    /// Match an architecture name (`x86`, `i386`, `i686`, `amd64`, `x86_64`)
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();

        match lower.as_str() {
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            // One or two characters followed by "86"
            s if (3..=4).contains(&s.len()) && s.ends_with("86") => Ok(Arch::X86),
            _ => Err(AvcError::UnsupportedArch(name.to_string())),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Supported OS/architecture pair, selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Profile of the host this binary was built for
    pub fn detect() -> Result<Self> {
        Self::from_names(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_names(os_name: &str, arch_name: &str) -> Result<Self> {
        Ok(Self {
            os: Os::from_name(os_name)?,
            arch: Arch::from_name(arch_name)?,
        })
    }

    /// Versioned resource name in the form `LibName-LibVer-OsId-ArchId`,
    /// for example `ffmpeg-6.1.1-linux-x86_64`.
    pub fn native_name(&self, lib_name: &str, lib_version: &str) -> Result<String> {
        check_value("library name", lib_name)?;
        check_value("library version", lib_version)?;

        Ok([lib_name, lib_version, self.os.id(), self.arch.id()].join(SEPARATOR))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.os, SEPARATOR, self.arch)
    }
}

/// Append `dir` to a `PATH`-like value
pub(crate) fn extend_path_var(current: Option<OsString>, dir: &Path, separator: char) -> OsString {
    let mut value = current.unwrap_or_default();
    if !value.is_empty() {
        value.push(separator.to_string());
    }
    value.push(dir.as_os_str());
    value
}
