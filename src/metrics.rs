// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record a native library bound successfully
pub fn record_library_loaded(name: &str) {
    counter!("avc_native_library_loads_total", "library" => name.to_string()).increment(1);
}

/// Record a native library that could not be found or bound
pub fn record_library_failure(name: &str) {
    counter!("avc_native_library_failures_total", "library" => name.to_string()).increment(1);
}

/// Record time spent unpacking a native archive
pub fn record_unpack_duration(duration: Duration) {
    histogram!("avc_native_unpack_seconds").record(duration.as_secs_f64());
}

/// Record one full native initialization
pub fn record_init_duration(duration: Duration) {
    histogram!("avc_native_init_seconds").record(duration.as_secs_f64());
}

/// Record process output lines
pub fn record_output_lines(binary: &str, lines: usize) {
    counter!("avc_native_process_output_lines_total", "binary" => binary.to_string())
        .increment(lines as u64);
}

/// Metrics guard that tracks one helper process run
pub struct ProcessGuard {
    binary: String,
    start: Instant,
}

impl ProcessGuard {
    pub fn new(binary: &str) -> Self {
        counter!("avc_native_process_runs_total", "binary" => binary.to_string()).increment(1);
        Self {
            binary: binary.to_string(),
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        self.record_duration();
    }

    pub fn error(self) {
        counter!("avc_native_process_errors_total", "binary" => self.binary.clone()).increment(1);
        self.record_duration();
    }

    fn record_duration(&self) {
        histogram!("avc_native_process_duration_seconds", "binary" => self.binary.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use metrics::{
        Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };

    /// Keeps `name{label=value,..}` of every counter increment
    #[derive(Default)]
    pub(crate) struct CountingRecorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CountingRecorder {
        pub(crate) fn counted(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    struct CountingHandle {
        key: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CounterFn for CountingHandle {
        fn increment(&self, _value: u64) {
            self.log.lock().unwrap().push(self.key.clone());
        }

        fn absolute(&self, _value: u64) {}
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let labels: Vec<String> = key
                .labels()
                .map(|l| format!("{}={}", l.key(), l.value()))
                .collect();
            Counter::from_arc(Arc::new(CountingHandle {
                key: format!("{}{{{}}}", key.name(), labels.join(",")),
                log: Arc::clone(&self.log),
            }))
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CountingRecorder;
    use super::*;

    #[test]
    fn test_process_guard_error() {
        let recorder = CountingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            ProcessGuard::new("ffprobe").success();
            ProcessGuard::new("ffmpeg").error();
        });

        assert_eq!(
            recorder.counted(),
            vec![
                "avc_native_process_runs_total{binary=ffprobe}",
                "avc_native_process_runs_total{binary=ffmpeg}",
                "avc_native_process_errors_total{binary=ffmpeg}",
            ]
        );
    }
}
