//! Mount operations trait.

use crate::HalResult;
use std::path::Path;

/// Trait for mounting and unmounting filesystems.
pub trait MountOps {
    /// Mount `source` (a device node or an image file) on an existing directory.
    ///
    /// # Arguments
    /// * `source` - Device path (e.g., `/dev/sdb1`) or optical image path
    /// * `target` - Mount point path, must already exist
    /// * `options` - Filesystem type and flags
    fn mount(&self, source: &Path, target: &Path, options: &MountOptions) -> HalResult<()>;

    /// Unmount a filesystem.
    fn unmount(&self, target: &Path) -> HalResult<()>;

    /// Check if a path is currently a mount point.
    fn is_mounted(&self, path: &Path) -> HalResult<bool>;
}

/// Mount options and flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Filesystem type (e.g. `"vfat"`, `"ntfs-3g"`); `None` lets mount probe it.
    pub fstype: Option<String>,
    pub read_only: bool,
    /// Attach the source through a loop device first (image files).
    pub loop_image: bool,
    /// Additional mount options as a comma-separated string.
    pub options: Option<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only mount of an installation image or optical drive.
    pub fn source(is_image: bool) -> Self {
        Self {
            fstype: None,
            read_only: true,
            loop_image: is_image,
            options: None,
        }
    }

    pub fn with_fstype(fstype: impl Into<String>) -> Self {
        Self {
            fstype: Some(fstype.into()),
            ..Self::default()
        }
    }

    /// Render the `-o` argument for mount(8), if any.
    pub fn option_string(&self) -> Option<String> {
        let mut opts = Vec::new();
        if self.read_only {
            opts.push("ro".to_string());
        }
        if self.loop_image {
            opts.push("loop".to_string());
        }
        if let Some(ref extra) = self.options {
            opts.push(extra.clone());
        }
        if opts.is_empty() {
            None
        } else {
            Some(opts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_source_mounts_loop_read_only() {
        assert_eq!(
            MountOptions::source(true).option_string().as_deref(),
            Some("ro,loop")
        );
        assert_eq!(
            MountOptions::source(false).option_string().as_deref(),
            Some("ro")
        );
        assert_eq!(MountOptions::with_fstype("vfat").option_string(), None);
    }
}
