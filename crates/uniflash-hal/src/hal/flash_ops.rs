//! Raw image writing operations trait.

use super::DiskOptions;
use crate::HalResult;
use std::path::Path;

/// Trait for writing raw images onto block devices or partitions.
pub trait FlashOps {
    /// Write `image_path` byte-for-byte onto `target`.
    ///
    /// # Arguments
    /// * `image_path` - Path to the raw image file
    /// * `target` - Target block device or partition (e.g., `/dev/sdb2`)
    fn flash_raw_image(&self, image_path: &Path, target: &Path, opts: &DiskOptions)
        -> HalResult<()>;
}
