//! Recursive source-to-target file copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uniflash_error::{FlashError, FlashResult, HalError};
use uniflash_hal::{CopyOps, CopyOptions};
use walkdir::WalkDir;

use crate::progress::{ProgressReporter, ProgressState, DEFAULT_PROGRESS_INTERVAL};
use crate::status::StatusSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub bytes: u64,
    pub files: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Completed(CopySummary),
    /// Stopped between files; already copied files stay in place.
    Cancelled(CopySummary),
}

impl CopyOutcome {
    pub fn summary(&self) -> CopySummary {
        match self {
            CopyOutcome::Completed(summary) | CopyOutcome::Cancelled(summary) => *summary,
        }
    }
}

/// Stops the reporter however the copy loop is left.
struct StopOnExit<'a>(&'a ProgressReporter);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

pub struct FileCopier<'a, H: CopyOps + ?Sized> {
    hal: &'a H,
    sink: &'a Arc<StatusSink>,
    interval: Duration,
    options: CopyOptions,
}

impl<'a, H: CopyOps + ?Sized> FileCopier<'a, H> {
    pub fn new(hal: &'a H, sink: &'a Arc<StatusSink>) -> Self {
        Self {
            hal,
            sink,
            interval: DEFAULT_PROGRESS_INTERVAL,
            options: CopyOptions::preserving_times(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    /// Duplicate every regular file under `source` into `target`, keeping relative paths.
    ///
    /// A reporter is started for the duration of the copy and parked in `reporter` so the owner
    /// can stop it as well; it is always stopped before this returns. The first failing file
    /// aborts the whole copy.
    pub fn copy(
        &self,
        source: &Path,
        target: &Path,
        reporter: &mut Option<Arc<ProgressReporter>>,
    ) -> FlashResult<CopyOutcome> {
        let state = Arc::new(ProgressState::new(self.sink.cancel_token()));
        let running = Arc::new(ProgressReporter::start(
            Arc::clone(&state),
            Arc::clone(self.sink),
            self.interval,
        )?);
        *reporter = Some(Arc::clone(&running));
        let _stop = StopOnExit(&running);

        let mut summary = CopySummary::default();
        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| walk_failed(source, err))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|err| FlashError::Internal(err.to_string()))?;
            let dest = target.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest).map_err(|err| copy_failed(&dest, err))?;
                continue;
            }
            if !entry.file_type().is_file() {
                log::debug!("Skipping non-regular entry {}", entry.path().display());
                continue;
            }

            if state.cancel_requested() {
                log::info!(
                    "Copy cancelled after {} files ({} bytes)",
                    summary.files,
                    summary.bytes
                );
                running.stop();
                return Ok(CopyOutcome::Cancelled(summary));
            }

            state.begin_file(relative);
            let bytes = self
                .hal
                .copy_file(entry.path(), &dest, &self.options)
                .map_err(|cause| FlashError::CopyFailed {
                    path: entry.path().to_path_buf(),
                    cause,
                })?;
            state.finish_file(bytes);
            summary.bytes += bytes;
            summary.files += 1;
        }

        state.mark_done();
        running.stop();
        Ok(CopyOutcome::Completed(summary))
    }
}

fn copy_failed(path: &Path, err: io::Error) -> FlashError {
    FlashError::CopyFailed {
        path: path.to_path_buf(),
        cause: HalError::Io(err),
    }
}

fn walk_failed(source: &Path, err: walkdir::Error) -> FlashError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(source));
    copy_failed(&path, io::Error::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uniflash_hal::{FakeHal, HalResult, LinuxHal, OperationKind};

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("boot/fonts")).unwrap();
        fs::create_dir_all(root.join("sources")).unwrap();
        fs::create_dir_all(root.join("support/empty")).unwrap();
        fs::write(root.join("setup.exe"), b"MZ\x90\x00").unwrap();
        fs::write(root.join("boot/fonts/segoe.ttf"), b"font").unwrap();
        fs::write(root.join("sources/boot.wim"), vec![7u8; 4096]).unwrap();
    }

    #[test]
    fn copies_tree_with_structure_and_counts() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        sample_tree(src.path());
        let sink = Arc::new(StatusSink::new());
        let hal = LinuxHal::new();
        let mut slot = None;

        let outcome = FileCopier::new(&hal, &sink)
            .with_interval(Duration::from_millis(5))
            .copy(src.path(), dst.path(), &mut slot)
            .unwrap();

        assert_eq!(
            outcome,
            CopyOutcome::Completed(CopySummary {
                bytes: 4 + 4 + 4096,
                files: 3
            })
        );
        assert_eq!(fs::read(dst.path().join("boot/fonts/segoe.ttf")).unwrap(), b"font");
        assert!(dst.path().join("support/empty").is_dir());
        let reporter = slot.expect("reporter parked in slot");
        assert!(!reporter.is_running());
    }

    #[test]
    fn cancellation_stops_before_the_next_file() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        sample_tree(src.path());
        let sink = Arc::new(StatusSink::new());
        sink.request_cancel();
        let hal = FakeHal::new();
        let mut slot = None;

        let outcome = FileCopier::new(&hal, &sink)
            .copy(src.path(), dst.path(), &mut slot)
            .unwrap();

        assert_eq!(outcome, CopyOutcome::Cancelled(CopySummary::default()));
        assert_eq!(hal.count(OperationKind::CopyFile), 0);
        assert!(!slot.unwrap().is_running());
    }

    /// Copies through a `FakeHal` and pulls the cancel flag once the first file is written.
    struct CancelAfterFirst {
        inner: FakeHal,
        cancel: crate::status::CancelToken,
    }

    impl CopyOps for CancelAfterFirst {
        fn copy_file(&self, src: &Path, dst: &Path, opts: &CopyOptions) -> HalResult<u64> {
            let bytes = self.inner.copy_file(src, dst, opts)?;
            self.cancel.cancel();
            Ok(bytes)
        }
    }

    #[test]
    fn cancellation_mid_copy_keeps_finished_files() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        sample_tree(src.path());
        let sink = Arc::new(StatusSink::new());
        let hal = CancelAfterFirst {
            inner: FakeHal::new(),
            cancel: sink.cancel_token(),
        };
        let mut slot = None;

        let outcome = FileCopier::new(&hal, &sink)
            .copy(src.path(), dst.path(), &mut slot)
            .unwrap();

        assert_eq!(
            outcome,
            CopyOutcome::Cancelled(CopySummary { bytes: 4, files: 1 })
        );
        assert_eq!(hal.inner.count(OperationKind::CopyFile), 1);
        assert_eq!(
            fs::metadata(dst.path().join("boot/fonts/segoe.ttf")).unwrap().len(),
            4
        );
        assert!(!dst.path().join("setup.exe").exists());
        assert!(!dst.path().join("sources/boot.wim").exists());
        assert!(!slot.unwrap().is_running());
    }

    #[test]
    fn a_failing_file_aborts_with_its_path() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        sample_tree(src.path());
        let sink = Arc::new(StatusSink::new());
        let hal = FakeHal::new();
        hal.fail_on(OperationKind::CopyFile);
        let mut slot = None;

        let err = FileCopier::new(&hal, &sink)
            .copy(src.path(), dst.path(), &mut slot)
            .unwrap_err();

        match err {
            FlashError::CopyFailed { path, .. } => {
                assert_eq!(path, src.path().join("boot/fonts/segoe.ttf"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hal.count(OperationKind::CopyFile), 1);
        assert!(!slot.unwrap().is_running());
    }
}
