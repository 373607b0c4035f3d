// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Companion executable launcher
//!
//! Runs `ffmpeg`, `ffprobe` or `ffserver` from the unpacked native directory
//! through the platform shell, logs every output line and returns once the
//! process exited and both streams hit EOF.
//!
//! There is no timeout and no cancellation: the caller waits for the helper.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, info, warn};

use crate::error::{AvcError, Result};
use crate::metrics::{record_output_lines, ProcessGuard};
use crate::platform::Os;

/// Companion executables shipped with the native suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binary {
    /// Converter; also grabs from live sources and resamples/rescales on the fly
    Ffmpeg,
    /// Prints stream information in human- and machine-readable form
    Ffprobe,
    /// Streaming server for audio and video feeds
    Ffserver,
}

impl Binary {
    pub fn name(&self) -> &'static str {
        match self {
            Binary::Ffmpeg => "ffmpeg",
            Binary::Ffprobe => "ffprobe",
            Binary::Ffserver => "ffserver",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ffmpeg" => Some(Binary::Ffmpeg),
            "ffprobe" => Some(Binary::Ffprobe),
            "ffserver" => Some(Binary::Ffserver),
            _ => None,
        }
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a helper process printed, plus how it exited
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: Vec<String>,
    /// Empty unless stderr was captured
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

/// Run `bin_file` with the command-line string `args`.
///
/// stdout is always drained; stderr only when `capture_stderr` is set,
/// otherwise it is discarded. Both streams are read concurrently so a chatty
/// stderr can not block the child on a full pipe.
///
/// A non-zero exit status is reported in [`ProcessOutput`], not as an error.
pub async fn run(os: Os, bin_file: &Path, args: &str, capture_stderr: bool) -> Result<ProcessOutput> {
    if !bin_file.is_file() {
        return Err(AvcError::BinaryNotFound(bin_file.to_path_buf()));
    }

    let binary = bin_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let guard = ProcessGuard::new(&binary);

    match run_inner(os, bin_file, &binary, args, capture_stderr).await {
        Ok(output) => {
            guard.success();
            Ok(output)
        }
        Err(e) => {
            guard.error();
            Err(e)
        }
    }
}

async fn run_inner(
    os: Os,
    bin_file: &Path,
    binary: &str,
    args: &str,
    capture_stderr: bool,
) -> Result<ProcessOutput> {
    if os == Os::Linux {
        make_executable(bin_file)?;
    }

    let mut cmd = os.native_command(bin_file, args);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    info!("Running {} {}", bin_file.display(), args);
    debug!("Command: {:?}", cmd.as_std());

    let process_err = |message: String| AvcError::Process {
        binary: binary.to_string(),
        message,
    };

    let mut child = cmd
        .spawn()
        .map_err(|e| process_err(format!("failed to spawn: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| process_err("failed to get stdout".to_string()))?;
    let stderr = child.stderr.take();

    let drained = tokio::try_join!(
        drain_lines(binary, OutputStream::Stdout, stdout),
        async move {
            match stderr {
                Some(stderr) => drain_lines(binary, OutputStream::Stderr, stderr).await,
                None => Ok(Vec::new()),
            }
        }
    );

    // The child is always reaped, also when reading its output failed
    if drained.is_err() {
        let _ = child.start_kill();
    }
    let status = child
        .wait()
        .await
        .map_err(|e| process_err(format!("failed to wait: {e}")))?;
    let (stdout, stderr) = drained?;

    if status.success() {
        debug!("{} exited successfully", binary);
    } else {
        warn!("{} exited with status: {}", binary, status);
    }
    record_output_lines(binary, stdout.len() + stderr.len());

    Ok(ProcessOutput {
        exit_code: status.code(),
        success: status.success(),
        stdout,
        stderr,
    })
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Read `reader` to EOF, logging and collecting every line.
///
/// Lines are split on `\n` only and decoded lossily: tools print metadata in
/// whatever encoding the media file carries, and such a line must not end the
/// capture.
async fn drain_lines<R>(binary: &str, stream: OutputStream, reader: R) -> Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, AnyDelimiterCodec::new(b"\n".to_vec(), Vec::new()));
    let mut captured = Vec::new();

    while let Some(chunk) = lines.next().await {
        let chunk = chunk.map_err(|e| AvcError::Process {
            binary: binary.to_string(),
            message: format!("failed to read {stream:?}: {e}"),
        })?;

        let bytes = chunk.strip_suffix(b"\r").unwrap_or(&chunk[..]);
        let line = String::from_utf8_lossy(bytes).into_owned();
        match stream {
            OutputStream::Stdout => info!("{}: {}", binary, line),
            OutputStream::Stderr => debug!("{} (stderr): {}", binary, line),
        }
        captured.push(line);
    }

    Ok(captured)
}

/// `chmod u+x`; archives do not always keep the mode bits
#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o100 == 0 {
        permissions.set_mode(mode | 0o100);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
