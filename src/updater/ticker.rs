//! Periodic driver for a [`DirectoryUpdater`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{DirectoryUpdater, TickReport};

/// How often a sleeping ticker checks the shared shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Clears the single-flight flag when a tick ends, even by panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_guarded(updater: &dyn DirectoryUpdater, running: &AtomicBool) -> Option<TickReport> {
    if running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        log::trace!("[{}] tick already in progress", updater.name());
        return None;
    }
    let _guard = InFlight(running);
    let started = Instant::now();
    let report = updater.tick();
    log::debug!(
        "[{}] tick finished in {:.2?}: {:?}",
        updater.name(),
        started.elapsed(),
        report
    );
    Some(report)
}

/// A dedicated thread calling [`DirectoryUpdater::tick`] every
/// [`DirectoryUpdater::tick_interval`].
///
/// The thread ticks immediately after spawning. It stops when [`stop`] is
/// called, when the handle is dropped, or when the shared shutdown flag is
/// set.
///
/// [`stop`]: TickingThread::stop
pub struct TickingThread {
    updater: Arc<dyn DirectoryUpdater>,
    running: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TickingThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickingThread")
            .field("updater", &self.updater.name())
            .field("alive", &self.handle.is_some())
            .finish()
    }
}

impl TickingThread {
    /// Start ticking `updater` on a new thread named after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(
        updater: Arc<dyn DirectoryUpdater>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let running = Arc::new(AtomicBool::new(false));

        let thread_updater = Arc::clone(&updater);
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(format!("updater-{}", updater.name()))
            .spawn(move || {
                let interval = thread_updater.tick_interval();
                'ticks: loop {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    run_guarded(thread_updater.as_ref(), &thread_running);

                    // `None` when the interval is too long to represent: wait for stop.
                    let deadline = Instant::now().checked_add(interval);
                    loop {
                        if shutdown.load(Ordering::SeqCst) {
                            break 'ticks;
                        }
                        let remaining = deadline.map_or(SHUTDOWN_POLL, |d| {
                            d.saturating_duration_since(Instant::now())
                        });
                        if remaining.is_zero() {
                            break;
                        }
                        match stop_rx.recv_timeout(remaining.min(SHUTDOWN_POLL)) {
                            Err(RecvTimeoutError::Timeout) => {}
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break 'ticks,
                        }
                    }
                }
                log::debug!("[{}] updater thread exiting", thread_updater.name());
            })?;

        log::debug!(
            "[{}] updater thread started (interval {:?})",
            updater.name(),
            updater.tick_interval()
        );
        Ok(Self {
            updater,
            running,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// The driven updater.
    #[must_use]
    pub fn updater(&self) -> &Arc<dyn DirectoryUpdater> {
        &self.updater
    }

    /// Run one tick on the calling thread unless a tick is already running.
    ///
    /// Returns `None` if the tick was skipped.
    pub fn tick_now(&self) -> Option<TickReport> {
        run_guarded(self.updater.as_ref(), &self.running)
    }

    /// Stop the thread and wait for the current tick to finish.
    ///
    /// Calling `stop` more than once is a no-op.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[{}] updater thread panicked", self.updater.name());
            }
        }
    }
}

impl Drop for TickingThread {
    fn drop(&mut self) {
        self.stop();
    }
}
