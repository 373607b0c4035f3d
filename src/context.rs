// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! One-time initialization
//!
//! Loading the native suite unpacks archives and maps shared objects, so it
//! must happen at most once even when many tasks ask for it at the same time.
//! [`AvcContext`] is created explicitly at startup and handed to consumers;
//! there is no global instance.

use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::AvcConfig;
use crate::error::{AvcError, Result};
use crate::native::NativeAvc;

/// Value produced by a blocking initializer, at most once.
///
/// Concurrent callers wait for the first initializer to finish. The
/// initializer runs on the blocking pool and is tracked by its join handle,
/// so a caller that stops waiting (dropped future, timeout) leaves it running
/// and the next caller waits for that same run instead of starting another.
/// A failed initialization is not stored: the next caller runs its own
/// initializer again.
#[derive(Debug)]
pub struct InitOnce<T> {
    cell: OnceCell<Arc<T>>,
    pending: Mutex<Option<JoinHandle<Result<T>>>>,
}

impl<T> Default for InitOnce<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
            pending: Mutex::new(None),
        }
    }
}

impl<T> InitOnce<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Value, if already initialized
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Return the value, running `init` on the blocking pool unless an
    /// earlier initializer already succeeded or is still running
    pub async fn get_or_init_blocking<F>(&self, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let mut pending = self.pending.lock().await;
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let task = pending.get_or_insert_with(|| {
            debug!("Running one-time initializer");
            tokio::task::spawn_blocking(init)
        });
        let joined = task.await;
        *pending = None;

        let value = match joined {
            Ok(result) => Arc::new(result?),
            Err(e) => return Err(AvcError::Init(e.to_string())),
        };
        if self.cell.set(Arc::clone(&value)).is_err() {
            return Err(AvcError::Init("value initialized twice".to_string()));
        }
        Ok(value)
    }
}

/// Process-scoped entry point: configuration plus the lazily loaded suite
#[derive(Debug)]
pub struct AvcContext {
    config: AvcConfig,
    native: InitOnce<NativeAvc>,
}

impl AvcContext {
    pub fn new(config: AvcConfig) -> Self {
        Self {
            config,
            native: InitOnce::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(AvcConfig::from_env())
    }

    pub fn config(&self) -> &AvcConfig {
        &self.config
    }

    /// Loaded native suite; the first call performs the load
    pub async fn native(&self) -> Result<Arc<NativeAvc>> {
        if let Some(native) = self.native.get() {
            return Ok(native);
        }

        let config = self.config.clone();
        let native = self
            .native
            .get_or_init_blocking(move || NativeAvc::load(&config))
            .await?;
        info!("Native suite available from {}", native.native_dir().display());
        Ok(native)
    }

    pub fn is_loaded(&self) -> bool {
        self.native.is_initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_init_at_most_once() {
        let once = Arc::new(InitOnce::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let once = Arc::clone(&once);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                once.get_or_init_blocking(move || {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 100)
                })
                .await
                .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(*handle.await.unwrap(), 100);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(once.is_initialized());
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let once = InitOnce::<&'static str>::new();

        let err = once
            .get_or_init_blocking(|| Err(AvcError::UnsupportedArch("sparc".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, AvcError::UnsupportedArch(_)));
        assert!(once.get().is_none());

        let value = once.get_or_init_blocking(|| Ok("loaded")).await.unwrap();
        assert_eq!(*value, "loaded");
    }

    #[tokio::test]
    async fn test_abandoned_wait_keeps_single_init() {
        let once = Arc::new(InitOnce::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let first_calls = Arc::clone(&calls);
        let first = tokio::time::timeout(
            Duration::from_millis(10),
            once.get_or_init_blocking(move || {
                std::thread::sleep(Duration::from_millis(200));
                Ok(first_calls.fetch_add(1, Ordering::SeqCst) + 1)
            }),
        )
        .await;
        assert!(first.is_err(), "first caller should have timed out");

        let second_calls = Arc::clone(&calls);
        let value = once
            .get_or_init_blocking(move || Ok(second_calls.fetch_add(1, Ordering::SeqCst) + 10))
            .await
            .unwrap();

        assert_eq!(*value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_initializer() {
        let once = InitOnce::<u8>::new();
        let err = once
            .get_or_init_blocking(|| panic!("native constructor crashed"))
            .await
            .unwrap_err();
        assert!(matches!(err, AvcError::Init(_)));
    }

    #[tokio::test]
    async fn test_context_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AvcConfig::with_resource_dir(dir.path());
        config.temp_dir = dir.path().to_path_buf();

        let context = AvcContext::new(config);
        let err = context.native().await.unwrap_err();

        // Unsupported hosts and foreign C runtimes fail before the resource lookup
        assert!(
            matches!(err, AvcError::ResourceNotFound { .. })
                || matches!(err, AvcError::LibraryNotLoaded { ref name, .. } if name == "c")
                || err.is_fatal_platform(),
            "{err}"
        );
        assert!(!context.is_loaded());
    }
}
