//! Ctrl+C handling for graceful shutdown.
//!
//! A single `AtomicBool` is shared with every long-running component: the
//! scanners stop walking, the ticking threads stop between ticks and the
//! `watch` loop saves snapshots before exiting with code 130.
//!
//! ```rust,no_run
//! use sharelist::signal::install_handler;
//!
//! let handler = install_handler().expect("signal handler");
//! let flag = handler.get_flag();
//! // hand `flag` to updaters and walkers
//! while !handler.wait_for_shutdown(std::time::Duration::from_secs(1)) {}
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether Ctrl+C was pressed or [`Self::request_shutdown`] was called.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown programmatically.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// A handle to the flag for worker threads.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Sleep until shutdown is requested or `timeout` elapses.
    ///
    /// Returns `true` if shutdown was requested. A timeout too long to
    /// represent waits for shutdown only.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.is_shutdown_requested() {
                return true;
            }
            let remaining = deadline.map_or(POLL_INTERVAL, |d| {
                d.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                return false;
            }
            thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The Ctrl+C handler could not be registered.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler.
///
/// Later calls return the already installed handler with its flag reset, so
/// `run_app` can be called repeatedly (e.g. from tests).
///
/// # Errors
///
/// [`SignalError::InstallFailed`] if another handler owns the signal.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Saving state...");
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
    })?;

    let _ = GLOBAL_HANDLER.set(handler.clone());
    log::debug!("Ctrl+C handler installed");
    Ok(handler)
}
