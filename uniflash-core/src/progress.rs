//! Copy progress shared between the copier and a background reporter thread.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::analyze::human_size;
use crate::status::{CancelToken, StatusSink};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// State written by the copier and read by the reporter.
///
/// The copier is the only writer of the file and byte fields; the cancel flag is the only thing
/// an outside actor may set.
#[derive(Debug)]
pub struct ProgressState {
    current_file: Mutex<Option<PathBuf>>,
    bytes_copied: AtomicU64,
    files_copied: AtomicU64,
    done: AtomicBool,
    cancel: CancelToken,
}

impl ProgressState {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            current_file: Mutex::new(None),
            bytes_copied: AtomicU64::new(0),
            files_copied: AtomicU64::new(0),
            done: AtomicBool::new(false),
            cancel,
        }
    }

    pub fn begin_file(&self, path: &Path) {
        match self.current_file.lock() {
            Ok(mut current) => *current = Some(path.to_path_buf()),
            Err(poisoned) => *poisoned.into_inner() = Some(path.to_path_buf()),
        }
    }

    pub fn finish_file(&self, bytes: u64) {
        self.bytes_copied.fetch_add(bytes, Ordering::SeqCst);
        self.files_copied.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        match self.current_file.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::SeqCst)
    }

    pub fn files_copied(&self) -> u64 {
        self.files_copied.load(Ordering::SeqCst)
    }

    /// Once set, never cleared.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Periodically relays the file being copied to the status sink.
///
/// The worker ticks on a stop channel's receive timeout, so stopping never waits out a full
/// sleep. [`ProgressReporter::stop`] is idempotent and joins the thread; dropping the reporter
/// stops it too.
#[derive(Debug)]
pub struct ProgressReporter {
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressReporter {
    pub fn start(
        state: Arc<ProgressState>,
        sink: Arc<StatusSink>,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("uniflash-progress".to_string())
            .spawn(move || {
                let mut last: Option<PathBuf> = None;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let current = state.current_file();
                    if current.is_some() && current != last {
                        if let Some(ref file) = current {
                            sink.info(format!(
                                "Copying: {} ({} copied)",
                                file.display(),
                                human_size(state.bytes_copied())
                            ));
                        }
                        last = current;
                    }
                }
                log::debug!("progress reporter stopped");
            })?;

        Ok(Self {
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        match self.handle.lock() {
            Ok(handle) => handle.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Signal the worker and wait for it. Returns false if it was already stopped.
    pub fn stop(&self) -> bool {
        let tx = match self.stop_tx.lock() {
            Ok(mut tx) => tx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(tx);

        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    log::warn!("progress reporter thread panicked");
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
