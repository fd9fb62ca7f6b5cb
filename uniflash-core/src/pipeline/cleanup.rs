use std::fs;
use uniflash_hal::{DiskOps, MountOps, SystemOps};

use super::session::{FlashSession, MountPoint};
use crate::status::StatusSink;

/// Releases everything a session acquired. Never fails; problems are logged.
pub struct CleanupManager<'a> {
    hal: &'a dyn DiskOps,
    sink: &'a StatusSink,
}

impl<'a> CleanupManager<'a> {
    pub fn new(hal: &'a dyn DiskOps, sink: &'a StatusSink) -> Self {
        Self { hal, sink }
    }

    /// Stop the reporter, unmount target then source, remove the scratch directory.
    ///
    /// Safe to call on a session that never acquired some (or any) of these, and safe to call
    /// twice: released resources are taken out of the session.
    pub fn cleanup(&self, session: &mut FlashSession) {
        session.cleanup_runs += 1;
        self.sink.info("Cleaning up");

        if let Some(reporter) = session.reporter.take() {
            if reporter.stop() {
                log::debug!("stopped progress reporter during cleanup");
            }
        }

        if let Some(target) = session.target_mount.take() {
            if target.mounted {
                if let Err(err) = self.hal.sync() {
                    log::warn!("sync before unmounting target failed: {}", err);
                }
            }
            self.release(target, "target");
        }
        if let Some(source) = session.source_mount.take() {
            self.release(source, "source");
        }

        if let Some(scratch) = session.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(err) = scratch.close() {
                log::warn!(
                    "Failed to remove scratch directory {}: {}",
                    path.display(),
                    err
                );
            }
        }
    }

    fn release(&self, mount: MountPoint, role: &str) {
        if mount.mounted {
            if let Err(err) = self.hal.unmount(&mount.path) {
                log::warn!(
                    "Failed to unmount {} {}: {}",
                    role,
                    mount.path.display(),
                    err
                );
                // Never remove a directory that may still hold a live filesystem.
                return;
            }
        }
        if let Err(err) = fs::remove_dir(&mount.path) {
            log::warn!(
                "Failed to remove {} mountpoint {}: {}",
                role,
                mount.path.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use uniflash_hal::{FakeHal, FilesystemType, MountOptions, OperationKind};

    #[test]
    fn cleanup_releases_everything_once() {
        let root = tempfile::tempdir().unwrap();
        let hal = FakeHal::new();
        let sink = StatusSink::new();
        let mut session = FlashSession::new(FilesystemType::Fat32);

        session.scratch = Some(
            tempfile::Builder::new()
                .prefix("UniFlash.")
                .tempdir_in(root.path())
                .unwrap(),
        );
        let scratch = session.scratch_dir().unwrap().to_path_buf();
        let mountpoint = root.path().join("uniflash_source_x");
        fs::create_dir(&mountpoint).unwrap();
        hal.mount(Path::new("/isos/a.iso"), &mountpoint, &MountOptions::source(true))
            .unwrap();
        session.source_mount = Some(MountPoint {
            path: mountpoint.clone(),
            mounted: true,
        });

        let manager = CleanupManager::new(&hal, &sink);
        manager.cleanup(&mut session);
        manager.cleanup(&mut session);

        assert_eq!(session.cleanup_runs, 2);
        assert_eq!(hal.count(OperationKind::Unmount), 1);
        assert!(!mountpoint.exists());
        assert!(!scratch.exists());
    }

    #[test]
    fn failed_unmount_keeps_the_mountpoint() {
        let root = tempfile::tempdir().unwrap();
        let hal = FakeHal::new();
        hal.fail_on(OperationKind::Unmount);
        let sink = StatusSink::new();
        let mut session = FlashSession::new(FilesystemType::Ntfs);
        let mountpoint = root.path().join("uniflash_target_x");
        fs::create_dir(&mountpoint).unwrap();
        session.target_mount = Some(MountPoint {
            path: mountpoint.clone(),
            mounted: true,
        });

        CleanupManager::new(&hal, &sink).cleanup(&mut session);

        assert!(mountpoint.exists());
        assert_eq!(hal.count(OperationKind::Sync), 1);
        assert!(session.target_mount.is_none());
    }

    #[test]
    fn cleanup_of_an_empty_session_is_harmless() {
        let hal = FakeHal::new();
        let sink = StatusSink::new();
        let mut session = FlashSession::new(FilesystemType::Fat32);

        CleanupManager::new(&hal, &sink).cleanup(&mut session);

        assert_eq!(hal.operation_count(), 0);
        assert_eq!(session.cleanup_runs, 1);
    }
}
