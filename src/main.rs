// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! avc-native command line
//!
//! ```text
//! avc-native info [--json]          load the suite and print library versions
//! avc-native <binary> [args...]     run ffmpeg / ffprobe / ffserver
//! ```
//!
//! Configuration comes from `AVC_*` environment variables, logging from
//! `RUST_LOG`.

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avc_native::{AvcContext, Binary, NativeReport};

const USAGE: &str = "usage: avc-native info [--json] | avc-native <ffmpeg|ffprobe|ffserver> [args...]";

fn main() -> anyhow::Result<()> {
    // Build Tokio runtime manually; the helper processes do the heavy lifting
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let code = runtime.block_on(async_main())?;
    drop(runtime);
    std::process::exit(code);
}

async fn async_main() -> anyhow::Result<i32> {
    // Initialize tracing with explicit stdout target
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avc_native=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(false),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        bail!(USAGE);
    };
    let rest: Vec<String> = args.collect();

    let context = AvcContext::from_env();
    info!(config = ?context.config(), "avc-native {} starting", env!("CARGO_PKG_VERSION"));

    let native = context
        .native()
        .await
        .context("failed to load native suite")?;

    match command.as_str() {
        "info" => {
            let report = native.report();
            if rest.iter().any(|a| a == "--json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(0)
        }
        name => {
            if Binary::from_name(name).is_none() {
                warn!("{} is not a known FFmpeg executable, trying anyway", name);
            }
            let output = native
                .execute_named(
                    name,
                    &native.platform().os.join_args(&rest),
                    context.config().capture_stderr,
                )
                .await
                .with_context(|| format!("failed to run {name}"))?;

            match output.exit_code {
                Some(code) => Ok(code),
                None => bail!("{name} was terminated by a signal"),
            }
        }
    }
}

fn print_report(report: &NativeReport) {
    println!("FFmpeg {} ({})", report.version_info, report.platform);
    println!("Native directory: {}", report.native_dir.display());
    for lib in &report.libraries {
        println!("  {:<12} {:<10} {}", lib.name, lib.version.to_string(), lib.path.display());
    }
}
